//! Encryption layer for the data delivery pipeline.
//!
//! Produces and consumes a crypt4gh-style container:
//! - X25519 key exchange + XSalsa20-Poly1305 for sealing the data key
//!   into a per-recipient header packet
//! - ChaCha20-Poly1305 for the chunked data blocks
//! - Zeroized data keys
//!
//! # Container layout
//!
//! ```text
//! magic "crypt4gh" | version u32 LE | packet count u32 LE
//! header packet * count
//! data block * n   (ciphertext of <= 64 KiB plaintext + 16 byte tag)
//! ```
//!
//! Each data block is sealed with a nonce derived from the starting nonce
//! stored in the header packet and the block's position, so blocks must be
//! decrypted in the order they were written. The final block is bound to its
//! position through the associated data, which makes truncation at a block
//! boundary detectable.

mod error;
pub mod header;
pub mod keys;
pub mod stream;

pub use error::{CryptoError, CryptoResult};
pub use header::{DataParams, HeaderPacket, MAGIC, VERSION};
pub use keys::{KeyPair, KEY_SIZE, public_key_from_hex, secret_key_from_hex};
pub use stream::{
    decrypt, decrypt_file, encrypt, encrypt_file, part_path, DecryptionSummary, EncryptionSummary,
    CIPHER_SEGMENT_SIZE, SEGMENT_SIZE, TAG_SIZE,
};

pub use crypto_box::{PublicKey, SecretKey};
