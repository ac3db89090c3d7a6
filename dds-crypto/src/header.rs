//! Container preamble and header packets.
//!
//! A header packet carries the data encryption parameters (data key and
//! starting nonce) sealed for one recipient. Sealing uses an X25519 exchange
//! between the writer's secret key and the recipient's public key, followed
//! by XSalsa20-Poly1305, so the recipient needs the writer's public key,
//! which travels in clear inside the packet.

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KEY_SIZE;
use chacha20poly1305::aead::{AeadCore, KeyInit, OsRng};
use chacha20poly1305::ChaCha20Poly1305;
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use std::io::{Read, Write};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed literal at the start of every container.
pub const MAGIC: &[u8; 8] = b"crypt4gh";

/// Container format version.
pub const VERSION: u32 = 1;

/// Header sealing method: X25519 + XSalsa20-Poly1305.
pub const METHOD_X25519_XSALSA20_POLY1305: u32 = 0;

/// Packet type carrying data encryption parameters.
pub const PACKET_TYPE_DATA_PARAMS: u32 = 0;

/// Data block method: ChaCha20-IETF-Poly1305.
pub const DATA_METHOD_CHACHA20_POLY1305: u32 = 0;

/// Size of the per-block ChaCha20 nonce.
pub const DATA_NONCE_SIZE: usize = 12;

const BOX_NONCE_SIZE: usize = 24;
const BOX_TAG_SIZE: usize = 16;
const PARAMS_SIZE: usize = 4 + 4 + KEY_SIZE + DATA_NONCE_SIZE;
// method + writer key + nonce; the length prefix is not included.
const PACKET_FIXED_SIZE: usize = 4 + KEY_SIZE + BOX_NONCE_SIZE;
const MAX_PACKETS: u32 = 64;
const MAX_PACKET_LEN: usize = 4096;

/// Symmetric parameters for the data blocks of one container.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataParams {
    key: [u8; KEY_SIZE],
    start_nonce: [u8; DATA_NONCE_SIZE],
}

impl DataParams {
    /// Generates a fresh random data key and starting nonce.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&ChaCha20Poly1305::generate_key(&mut OsRng));
        let mut start_nonce = [0u8; DATA_NONCE_SIZE];
        start_nonce.copy_from_slice(&ChaCha20Poly1305::generate_nonce(&mut OsRng));
        Self { key, start_nonce }
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn start_nonce(&self) -> &[u8; DATA_NONCE_SIZE] {
        &self.start_nonce
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PARAMS_SIZE);
        out.extend_from_slice(&PACKET_TYPE_DATA_PARAMS.to_le_bytes());
        out.extend_from_slice(&DATA_METHOD_CHACHA20_POLY1305.to_le_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.start_nonce);
        out
    }

    fn from_bytes(mut bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != PARAMS_SIZE {
            bytes.zeroize();
            return Err(CryptoError::Format(format!(
                "header packet payload is {} bytes, expected {PARAMS_SIZE}",
                bytes.len()
            )));
        }

        let packet_type = le_u32(&bytes[0..4]);
        let method = le_u32(&bytes[4..8]);
        if packet_type != PACKET_TYPE_DATA_PARAMS || method != DATA_METHOD_CHACHA20_POLY1305 {
            bytes.zeroize();
            return Err(CryptoError::Format(format!(
                "unsupported packet type {packet_type} / data method {method}"
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes[8..8 + KEY_SIZE]);
        let mut start_nonce = [0u8; DATA_NONCE_SIZE];
        start_nonce.copy_from_slice(&bytes[8 + KEY_SIZE..]);
        bytes.zeroize();

        Ok(Self { key, start_nonce })
    }
}

/// One encrypted header packet as stored in the container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderPacket {
    pub method: u32,
    /// Writer's X25519 public key (sender side of DH).
    pub writer_public_key: [u8; KEY_SIZE],
    /// XSalsa20 nonce.
    pub nonce: [u8; BOX_NONCE_SIZE],
    /// Sealed data parameters (ciphertext + Poly1305 tag).
    pub ciphertext: Vec<u8>,
}

impl HeaderPacket {
    /// Seals data parameters for `recipient` using the writer's secret key.
    pub fn seal(
        params: &DataParams,
        recipient: &PublicKey,
        writer: &SecretKey,
    ) -> CryptoResult<Self> {
        let salsa_box = SalsaBox::new(recipient, writer);
        let generated = SalsaBox::generate_nonce(&mut OsRng);
        let mut nonce = [0u8; BOX_NONCE_SIZE];
        nonce.copy_from_slice(&generated);

        let mut plaintext = params.to_bytes();
        let sealed = salsa_box.encrypt(crypto_box::Nonce::from_slice(&nonce), plaintext.as_slice());
        plaintext.zeroize();
        let ciphertext =
            sealed.map_err(|e| CryptoError::Encryption(format!("header seal failed: {e}")))?;

        Ok(Self {
            method: METHOD_X25519_XSALSA20_POLY1305,
            writer_public_key: *writer.public_key().as_bytes(),
            nonce,
            ciphertext,
        })
    }

    /// Opens the packet with the recipient's secret key.
    pub fn open(&self, recipient: &SecretKey) -> CryptoResult<DataParams> {
        if self.method != METHOD_X25519_XSALSA20_POLY1305 {
            return Err(CryptoError::Format(format!(
                "unsupported header method {}",
                self.method
            )));
        }

        let writer_pk = PublicKey::from(self.writer_public_key);
        let salsa_box = SalsaBox::new(&writer_pk, recipient);
        let plaintext = salsa_box
            .decrypt(
                crypto_box::Nonce::from_slice(&self.nonce),
                self.ciphertext.as_slice(),
            )
            .map_err(|_| {
                CryptoError::Authentication(
                    "header packet open failed (wrong key or tampered data)".to_string(),
                )
            })?;

        DataParams::from_bytes(plaintext)
    }

    /// Total encoded length, including the length prefix.
    pub fn encoded_len(&self) -> usize {
        4 + PACKET_FIXED_SIZE + self.ciphertext.len()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.encoded_len() as u32).to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.writer_public_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    fn decode(body: &[u8]) -> CryptoResult<Self> {
        if body.len() < PACKET_FIXED_SIZE + BOX_TAG_SIZE {
            return Err(CryptoError::Format(format!(
                "header packet too short: {} bytes",
                body.len()
            )));
        }

        let method = le_u32(&body[0..4]);
        let mut writer_public_key = [0u8; KEY_SIZE];
        writer_public_key.copy_from_slice(&body[4..4 + KEY_SIZE]);
        let mut nonce = [0u8; BOX_NONCE_SIZE];
        nonce.copy_from_slice(&body[4 + KEY_SIZE..PACKET_FIXED_SIZE]);

        Ok(Self {
            method,
            writer_public_key,
            nonce,
            ciphertext: body[PACKET_FIXED_SIZE..].to_vec(),
        })
    }
}

/// Writes the preamble and all header packets. Returns the bytes written.
pub fn write_header<W: Write>(writer: &mut W, packets: &[HeaderPacket]) -> CryptoResult<u64> {
    let mut out = Vec::with_capacity(16 + packets.iter().map(|p| p.encoded_len()).sum::<usize>());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(packets.len() as u32).to_le_bytes());
    for packet in packets {
        out.extend_from_slice(&packet.encode());
    }
    writer.write_all(&out)?;
    Ok(out.len() as u64)
}

/// Reads and validates the preamble, returning the header packets.
pub fn read_header<R: Read>(reader: &mut R) -> CryptoResult<Vec<HeaderPacket>> {
    let mut preamble = [0u8; 16];
    read_exact_or_format(reader, &mut preamble, "container preamble")?;

    if &preamble[0..8] != MAGIC {
        return Err(CryptoError::Format("bad magic number".to_string()));
    }

    let version = le_u32(&preamble[8..12]);
    if version != VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported version {version} (expected {VERSION})"
        )));
    }

    let count = le_u32(&preamble[12..16]);
    if count == 0 || count > MAX_PACKETS {
        return Err(CryptoError::Format(format!("invalid header packet count {count}")));
    }

    let mut packets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut len_bytes = [0u8; 4];
        read_exact_or_format(reader, &mut len_bytes, "header packet length")?;
        let len = le_u32(&len_bytes) as usize;
        if !(4..=MAX_PACKET_LEN).contains(&len) {
            return Err(CryptoError::Format(format!("invalid header packet length {len}")));
        }

        let mut body = vec![0u8; len - 4];
        read_exact_or_format(reader, &mut body, "header packet")?;
        packets.push(HeaderPacket::decode(&body)?);
    }

    Ok(packets)
}

fn read_exact_or_format<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> CryptoResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CryptoError::Format(format!("container too short while reading {what}"))
        } else {
            CryptoError::Io(e)
        }
    })
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
