//! Per-file processing: hash, compress, encrypt.
//!
//! ```text
//! file -> SHA-256 -> zstd (unless already compressed) -> interrupt check -> container
//! ```
//!
//! Runs on a blocking thread; the whole chain is synchronous `Read`.

use crate::compression::COMPRESSION_LEVEL;
use crate::error::{DeliveryError, DeliveryResult};
use dds_crypto::{KeyPair, PublicKey};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Result of processing one file into a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Processed {
    pub encrypted_path: PathBuf,
    pub encrypted_size: u64,
    /// Bytes read from the original file.
    pub plaintext_bytes: u64,
    /// SHA-256 of the original file, hex.
    pub sha256: String,
    /// Container writer key, hex.
    pub writer_public_key: String,
}

/// Reader that hashes and counts everything passing through.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Hex digest and byte count of what was read.
    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Writer that hashes and counts everything passing through.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Inner writer, hex digest and byte count of what was written.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that fails once the session is interrupted.
pub struct CancellableReader<'a, R> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<'a, R: Read> CancellableReader<'a, R> {
    pub fn new(inner: R, cancel: &'a CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("delivery interrupted"));
        }
        self.inner.read(buf)
    }
}

/// Compresses (when `compress`) and encrypts `source` into `destination`.
///
/// On failure `destination` is removed. Interruption surfaces as
/// [`DeliveryError::Interrupted`].
pub fn process_file(
    source: &Path,
    destination: &Path,
    compress: bool,
    recipient: &PublicKey,
    sender: &KeyPair,
    cancel: &CancellationToken,
) -> DeliveryResult<Processed> {
    let result = encrypt_into(source, destination, compress, recipient, sender, cancel);
    match result {
        Ok(processed) => Ok(processed),
        Err(e) => {
            let _ = fs::remove_file(destination);
            if cancel.is_cancelled() {
                Err(DeliveryError::Interrupted)
            } else {
                Err(e)
            }
        }
    }
}

fn encrypt_into(
    source: &Path,
    destination: &Path,
    compress: bool,
    recipient: &PublicKey,
    sender: &KeyPair,
    cancel: &CancellationToken,
) -> DeliveryResult<Processed> {
    let mut hashing = HashingReader::new(BufReader::new(File::open(source)?));
    let mut out = BufWriter::new(File::create(destination)?);

    let summary = {
        let stage: Box<dyn Read + '_> = if compress {
            Box::new(zstd::stream::read::Encoder::new(&mut hashing, COMPRESSION_LEVEL)?)
        } else {
            Box::new(&mut hashing)
        };
        let mut reader = CancellableReader::new(stage, cancel);
        dds_crypto::encrypt(&mut reader, &mut out, recipient, Some(&sender.secret))?
    };
    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    let (sha256, plaintext_bytes) = hashing.finish();
    Ok(Processed {
        encrypted_path: destination.to_path_buf(),
        encrypted_size: summary.container_bytes,
        plaintext_bytes,
        sha256,
        writer_public_key: hex::encode(summary.writer_public_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn hashing_reader_matches_direct_digest() {
        let data = b"ACGTACGTACGT".repeat(1000);
        let mut reader = HashingReader::new(Cursor::new(data.clone()));
        io::copy(&mut reader, &mut io::sink()).unwrap();
        let (digest, bytes) = reader.finish();

        assert_eq!(bytes, data.len() as u64);
        assert_eq!(digest, hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn hashing_writer_sees_what_reaches_the_sink() {
        let data = b"GATTACA".repeat(500);
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        let (sink, digest, bytes) = writer.finish();

        assert_eq!(sink, data);
        assert_eq!(bytes, data.len() as u64);
        assert_eq!(digest, hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn cancelled_reader_errors() {
        let token = CancellationToken::new();
        token.cancel();
        let mut reader = CancellableReader::new(Cursor::new(vec![1u8; 4]), &token);
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn compressed_container_decrypts_to_zstd_of_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("reads.txt");
        let data = b"GATTACA\n".repeat(20_000);
        fs::write(&source, &data).unwrap();

        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let dest = dir.path().join("out.c4gh");
        let processed = process_file(
            &source,
            &dest,
            true,
            &recipient.public,
            &sender,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(processed.plaintext_bytes, data.len() as u64);
        assert_eq!(processed.writer_public_key, sender.public_hex());
        assert_eq!(processed.encrypted_size, fs::metadata(&dest).unwrap().len());
        assert!(processed.encrypted_size < data.len() as u64);

        let mut compressed = Vec::new();
        dds_crypto::decrypt(
            &mut File::open(&dest).unwrap(),
            &mut compressed,
            &recipient.secret,
            Some(&sender.public),
        )
        .unwrap();
        assert_eq!(zstd::decode_all(Cursor::new(compressed)).unwrap(), data);
    }

    #[test]
    fn interrupted_processing_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.bin");
        fs::write(&source, vec![7u8; 1024]).unwrap();
        let dest = dir.path().join("a.c4gh");

        let token = CancellationToken::new();
        token.cancel();
        let recipient = KeyPair::generate();
        let err = process_file(&source, &dest, false, &recipient.public, &KeyPair::generate(), &token)
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Interrupted));
        assert!(!dest.exists());
    }
}
