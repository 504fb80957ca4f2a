//! Checksum Engine
//!
//! CRC-32 (reflected, polynomial 0xEDB88320) shared by the journal and the
//! package container. Backed by `crc32fast`, which builds its lookup tables
//! once and folds input through them.
//!
//! Empty input yields 0, so an empty file is distinguishable from any
//! non-empty content.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, StashError};

/// Read chunk size for file checksums
const CHUNK_SIZE: usize = 64 * 1024;

/// CRC-32 of a whole buffer
pub fn crc32(bytes: &[u8]) -> u32 {
    if bytes.is_empty() {
        return 0;
    }
    crc32fast::hash(bytes)
}

/// CRC-32 of a file's contents (symlinks are followed)
pub fn crc32_file(path: &Path) -> Result<u32> {
    let file = File::open(path).map_err(|e| StashError::file(path, e))?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Crc32::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| StashError::file(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }

    debug!(path = %path.display(), bytes = hasher.len(), "checksummed file");
    Ok(hasher.finalize())
}

/// Streaming CRC-32 hasher
#[derive(Clone, Default)]
pub struct Crc32 {
    inner: crc32fast::Hasher,
    len: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold more bytes into the checksum
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
        self.len += bytes.len() as u64;
    }

    /// Bytes hashed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> u32 {
        if self.is_empty() {
            return 0;
        }
        self.inner.finalize()
    }
}
