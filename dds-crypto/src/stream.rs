//! Chunked authenticated encryption of byte streams.
//!
//! Both directions work incrementally over `Read`/`Write`: at most two
//! blocks are held in memory at a time. The second buffer is a one-block
//! lookahead used to decide whether the current block is the final one.

use crate::error::{CryptoError, CryptoResult};
use crate::header::{read_header, write_header, DataParams, HeaderPacket, DATA_NONCE_SIZE};
use crate::keys::KEY_SIZE;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use crypto_box::{PublicKey, SecretKey};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Plaintext bytes per data block.
pub const SEGMENT_SIZE: usize = 65_536;

/// Poly1305 tag size appended to each block.
pub const TAG_SIZE: usize = 16;

/// Maximum encoded size of a data block.
pub const CIPHER_SEGMENT_SIZE: usize = SEGMENT_SIZE + TAG_SIZE;

const AAD_INTERMEDIATE: [u8; 1] = [0x00];
const AAD_FINAL: [u8; 1] = [0x01];

/// Outcome of a successful [`encrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionSummary {
    /// Public half of the writer key; the recipient needs it to verify the sender.
    pub writer_public_key: [u8; KEY_SIZE],
    pub plaintext_bytes: u64,
    pub container_bytes: u64,
    pub blocks: u64,
}

/// Outcome of a successful [`decrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionSummary {
    pub writer_public_key: [u8; KEY_SIZE],
    pub plaintext_bytes: u64,
    pub blocks: u64,
}

/// Encrypts `reader` into a container written to `writer`.
///
/// When `sender` is `None` an ephemeral writer keypair is generated and
/// discarded afterwards. The header is written before the first block is
/// read from `reader`.
pub fn encrypt<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    recipient: &PublicKey,
    sender: Option<&SecretKey>,
) -> CryptoResult<EncryptionSummary> {
    let writer_secret = match sender {
        Some(sk) => sk.clone(),
        None => SecretKey::generate(&mut OsRng),
    };
    let writer_public_key = *writer_secret.public_key().as_bytes();

    let params = DataParams::generate();
    let packet = HeaderPacket::seal(&params, recipient, &writer_secret)?;
    let mut container_bytes = write_header(writer, &[packet])?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(params.key()));
    let mut current = vec![0u8; SEGMENT_SIZE];
    let mut lookahead = vec![0u8; SEGMENT_SIZE];
    let mut filled = read_block(reader, &mut current)?;
    let mut counter: u64 = 0;
    let mut plaintext_bytes: u64 = 0;

    loop {
        // A short block can only be produced at end of input.
        let next = if filled == SEGMENT_SIZE {
            read_block(reader, &mut lookahead)?
        } else {
            0
        };
        let last = next == 0;

        let nonce = block_nonce(params.start_nonce(), counter);
        let aad = if last { &AAD_FINAL } else { &AAD_INTERMEDIATE };
        let sealed = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &current[..filled],
                    aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("block {counter} seal failed: {e}")))?;

        writer.write_all(&sealed)?;
        container_bytes += sealed.len() as u64;
        plaintext_bytes += filled as u64;
        counter += 1;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut lookahead);
        filled = next;
    }

    writer.flush()?;

    Ok(EncryptionSummary {
        writer_public_key,
        plaintext_bytes,
        container_bytes,
        blocks: counter,
    })
}

/// Decrypts a container from `reader` into `writer`.
///
/// Each block's tag is verified before any of its plaintext reaches
/// `writer`. On the first verification failure decoding stops; blocks
/// already written stay in `writer`, so callers writing to a file must
/// discard it (see [`decrypt_file`]).
///
/// When `sender` is given, only header packets written by that key are
/// considered.
pub fn decrypt<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    recipient: &SecretKey,
    sender: Option<&PublicKey>,
) -> CryptoResult<DecryptionSummary> {
    let packets = read_header(reader)?;

    let mut opened = None;
    for packet in &packets {
        if let Some(expected) = sender
            && expected.as_bytes() != &packet.writer_public_key
        {
            continue;
        }
        if let Ok(params) = packet.open(recipient) {
            opened = Some((params, packet.writer_public_key));
            break;
        }
    }
    let (params, writer_public_key) = opened.ok_or(CryptoError::NoMatchingPacket)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(params.key()));
    let mut current = vec![0u8; CIPHER_SEGMENT_SIZE];
    let mut lookahead = vec![0u8; CIPHER_SEGMENT_SIZE];
    let mut filled = read_block(reader, &mut current)?;
    if filled == 0 {
        return Err(CryptoError::Authentication(
            "container truncated: no data blocks".to_string(),
        ));
    }

    let mut counter: u64 = 0;
    let mut plaintext_bytes: u64 = 0;

    loop {
        if filled < TAG_SIZE {
            return Err(CryptoError::Authentication(format!(
                "block {counter} truncated to {filled} bytes"
            )));
        }

        let next = if filled == CIPHER_SEGMENT_SIZE {
            read_block(reader, &mut lookahead)?
        } else {
            0
        };
        let last = next == 0;

        let nonce = block_nonce(params.start_nonce(), counter);
        let aad = if last { &AAD_FINAL } else { &AAD_INTERMEDIATE };
        let plaintext = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: &current[..filled],
                    aad,
                },
            )
            .map_err(|_| {
                CryptoError::Authentication(format!(
                    "block {counter} failed verification (wrong key or tampered data)"
                ))
            })?;

        writer.write_all(&plaintext)?;
        plaintext_bytes += plaintext.len() as u64;
        counter += 1;

        if last {
            break;
        }
        std::mem::swap(&mut current, &mut lookahead);
        filled = next;
    }

    writer.flush()?;

    Ok(DecryptionSummary {
        writer_public_key,
        plaintext_bytes,
        blocks: counter,
    })
}

/// Encrypts the file at `src` into a new container file at `dst`.
pub fn encrypt_file(
    src: &Path,
    dst: &Path,
    recipient: &PublicKey,
    sender: Option<&SecretKey>,
) -> CryptoResult<EncryptionSummary> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let result = encrypt(&mut reader, &mut writer, recipient, sender);
    drop(writer);

    if result.is_err() {
        let _ = fs::remove_file(dst);
    }
    result
}

/// Decrypts the container at `src` into `dst`.
///
/// Plaintext is written to a sibling `.part` file that is renamed to `dst`
/// only after every block verified. On any failure the partial output is
/// removed, so `dst` never holds truncated plaintext.
pub fn decrypt_file(
    src: &Path,
    dst: &Path,
    recipient: &SecretKey,
    sender: Option<&PublicKey>,
) -> CryptoResult<DecryptionSummary> {
    let part = part_path(dst);
    let mut reader = BufReader::new(File::open(src)?);

    let result = decrypt_into(&mut reader, &part, recipient, sender).and_then(|summary| {
        fs::rename(&part, dst)?;
        Ok(summary)
    });

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn decrypt_into<R: Read>(
    reader: &mut R,
    part: &Path,
    recipient: &SecretKey,
    sender: Option<&PublicKey>,
) -> CryptoResult<DecryptionSummary> {
    let mut writer = BufWriter::new(File::create(part)?);
    let summary = decrypt(reader, &mut writer, recipient, sender)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(summary)
}

/// Path used for in-progress output next to `dst`.
pub fn part_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn block_nonce(start: &[u8; DATA_NONCE_SIZE], counter: u64) -> Nonce {
    let mut nonce = *start;
    for (byte, c) in nonce.iter_mut().zip(counter.to_le_bytes()) {
        *byte ^= c;
    }
    *Nonce::from_slice(&nonce)
}

/// Fills `buf` from `reader` until it is full or the input ends.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> CryptoResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CryptoError::Io(e)),
        }
    }
    Ok(filled)
}
