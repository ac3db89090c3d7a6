//! Compressed-format detection and the zstd codec used for uploads.
//!
//! Header bytes decide whether a file is compressed. The file extension is
//! only advisory: a compression-like extension on a file whose header does
//! not confirm it produces a warning, never an error.

use crate::error::DeliveryResult;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Suffix appended to keys of files compressed by the pipeline.
pub const COMPRESSION_SUFFIX: &str = ".zst";

/// zstd level used when compressing uploads.
pub const COMPRESSION_LEVEL: i32 = 3;

const SNIFF_LEN: usize = 8;

/// Known magic numbers of compressed formats.
const SIGNATURES: &[(&str, &[u8])] = &[
    ("gzip", &[0x1F, 0x8B]),
    ("bzip2", b"BZh"),
    ("xz", &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
    ("zstd", &[0x28, 0xB5, 0x2F, 0xFD]),
    ("zip", &[0x50, 0x4B, 0x03, 0x04]),
    ("zip", &[0x50, 0x4B, 0x05, 0x06]),
    ("zip", &[0x50, 0x4B, 0x07, 0x08]),
    ("7z", &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]),
    ("lz4", &[0x04, 0x22, 0x4D, 0x18]),
    ("rar", &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07]),
    ("lzip", b"LZIP"),
];

const COMPRESSED_EXTENSIONS: &[&str] = &["gz", "tgz", "bz2", "xz", "zst", "zip", "7z", "lz4", "rar", "lz"];

/// Outcome of inspecting one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sniff {
    /// Format name when the header matched a known signature.
    pub format: Option<&'static str>,
    /// The file name carries a compression-like extension.
    pub extension_hint: bool,
}

impl Sniff {
    pub fn compressed(&self) -> bool {
        self.format.is_some()
    }

    /// Extension claims compression but the header does not confirm it.
    pub fn extension_mismatch(&self) -> bool {
        self.extension_hint && self.format.is_none()
    }
}

/// Reads the head of `path` and matches it against known signatures.
///
/// Files too short to match anything are reported as not compressed. Only
/// I/O failures are errors.
pub fn sniff(path: &Path) -> DeliveryResult<Sniff> {
    let mut head = [0u8; SNIFF_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < SNIFF_LEN {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Sniff {
        format: detect(&head[..filled]),
        extension_hint: has_compressed_extension(path),
    })
}

/// Matches a byte prefix against known signatures.
pub fn detect(head: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(_, magic)| head.starts_with(magic))
        .map(|(name, _)| *name)
}

pub fn has_compressed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            COMPRESSED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}
