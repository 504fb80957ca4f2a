//! Checked byte cursor
//!
//! Forward-only reader over a package buffer. Every read names the field it
//! is decoding and fails with `PackageTruncated` instead of reading past the
//! end.

use bytes::Buf;

use crate::error::{Result, StashError};

pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    /// Bytes consumed so far
    pub(crate) fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<()> {
        if needed > self.buf.remaining() {
            return Err(StashError::PackageTruncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn read_bytes(&mut self, field: &'static str, len: usize) -> Result<&'a [u8]> {
        self.ensure(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Length-prefixed blob: u32 length, then that many bytes
    pub(crate) fn read_blob(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let len = self.read_u32(field)? as usize;
        self.read_bytes(field, len)
    }

    /// Length-prefixed UTF-8 string
    pub(crate) fn read_string(&mut self, field: &'static str) -> Result<String> {
        let bytes = self.read_blob(field)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StashError::PackageCorruption(format!("{} is not valid UTF-8", field)))
    }

    /// Four-byte marker that must match exactly
    pub(crate) fn expect_marker(&mut self, field: &'static str, marker: &[u8; 4]) -> Result<()> {
        let found = self.read_bytes(field, marker.len())?;
        if found != marker {
            return Err(StashError::PackageCorruption(format!(
                "bad {} at offset {}: {:?}",
                field,
                self.offset() - marker.len(),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }
}
