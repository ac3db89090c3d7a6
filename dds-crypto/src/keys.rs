//! X25519 key material for container encryption.

use crate::error::{CryptoError, CryptoResult};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SecretKey};

/// Size in bytes of X25519 public and secret keys.
pub const KEY_SIZE: usize = 32;

/// X25519 keypair used as a container writer or recipient.
///
/// The secret key implements `ZeroizeOnDrop` automatically (from crypto_box).
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Returns the secret key as raw 32-byte array.
    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Hex encoding of the public key, as stored by the metadata store.
    pub fn public_hex(&self) -> String {
        hex::encode(self.public_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }
}

/// Parses a hex-encoded X25519 public key.
pub fn public_key_from_hex(encoded: &str) -> CryptoResult<PublicKey> {
    decode_key(encoded).map(PublicKey::from)
}

/// Parses a hex-encoded X25519 secret key.
pub fn secret_key_from_hex(encoded: &str) -> CryptoResult<SecretKey> {
    decode_key(encoded).map(SecretKey::from)
}

fn decode_key(encoded: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|e| CryptoError::Format(format!("invalid hex key: {e}")))?;

    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        });
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_preserves_public_key() {
        let kp = KeyPair::generate();
        let parsed = public_key_from_hex(&kp.public_hex()).unwrap();
        assert_eq!(parsed.as_bytes(), kp.public.as_bytes());
    }

    #[test]
    fn secret_hex_rebuilds_same_keypair() {
        let kp = KeyPair::generate();
        let sk = secret_key_from_hex(&kp.secret_hex()).unwrap();
        assert_eq!(sk.public_key().as_bytes(), kp.public.as_bytes());
    }

    #[test]
    fn short_key_is_rejected() {
        let err = public_key_from_hex("abcd").unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength { expected: 32, actual: 2 }
        ));
    }

    #[test]
    fn non_hex_key_is_format_error() {
        assert!(matches!(
            secret_key_from_hex("not-a-key"),
            Err(CryptoError::Format(_))
        ));
    }
}
