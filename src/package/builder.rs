//! Package Builder
//!
//! Serializes a `PackageContainer` into one exactly sized buffer.

use bytes::BufMut;
use tracing::debug;

use crate::error::{Result, StashError};

use super::record::{FileAttributes, FileRecord, PackageContainer};
use super::{END_MARKER, FILE_MARKER, FORMAT_VERSION, MAGIC};

/// Size of every length prefix, integer field and marker
const WORD: usize = 4;

/// Fixed-size part of one file record: FILE, seq, kind, attrs, 4 string
/// prefixes, crc, data prefix, crc copy, linked crc, signature prefix,
/// seq copy, END.
const RECORD_FIXED_SIZE: usize = 15 * WORD;

/// Total encoded size of a container
pub fn encoded_len(container: &PackageContainer) -> usize {
    let header = MAGIC.len()
        + WORD
        + 3 * WORD
        + container.version.len()
        + container.description.len()
        + container.target_kernel.len()
        + WORD;

    header + container.files.iter().map(record_len).sum::<usize>()
}

fn record_len(file: &FileRecord) -> usize {
    RECORD_FIXED_SIZE
        + file.name.len()
        + file.linked_module_name.len()
        + file.core_object_name.len()
        + file.target_directory.len()
        + file.data.len()
        + file.signature.as_ref().map_or(0, Vec::len)
}

/// Encode a container
///
/// The stored per-file checksum is written as recorded; `FileRecord`
/// constructors compute it from the data.
pub fn pack(container: &PackageContainer) -> Result<Vec<u8>> {
    if container.format_version != FORMAT_VERSION {
        return Err(StashError::PackageCorruption(format!(
            "cannot write format version {} (this build writes {})",
            container.format_version, FORMAT_VERSION
        )));
    }

    let total = encoded_len(container);
    let mut buf: Vec<u8> = Vec::with_capacity(total);

    buf.put_slice(MAGIC);
    buf.put_u32_le(container.format_version);
    put_blob(&mut buf, "version", container.version.as_bytes())?;
    put_blob(&mut buf, "description", container.description.as_bytes())?;
    put_blob(&mut buf, "kernel version", container.target_kernel.as_bytes())?;
    buf.put_u32_le(to_u32("file count", container.files.len())?);

    for (seq, file) in container.files.iter().enumerate() {
        put_record(&mut buf, to_u32("file count", seq)?, file)?;
    }

    debug_assert_eq!(buf.len(), total);
    debug!(
        files = container.files.len(),
        bytes = buf.len(),
        version = %container.version,
        "packed container"
    );
    Ok(buf)
}

fn put_record(buf: &mut Vec<u8>, seq: u32, file: &FileRecord) -> Result<()> {
    let has_signature = file.attributes.contains(FileAttributes::DETACHED_SIGNATURE);
    if has_signature != file.signature.is_some() {
        return Err(StashError::PackageCorruption(format!(
            "'{}': detached signature attribute does not match signature data",
            file.name
        )));
    }

    buf.put_slice(FILE_MARKER);
    buf.put_u32_le(seq);
    buf.put_u32_le(file.kind.as_u32());
    buf.put_u32_le(file.attributes.bits());
    put_blob(buf, "file name", file.name.as_bytes())?;
    put_blob(buf, "linked module name", file.linked_module_name.as_bytes())?;
    put_blob(buf, "core object name", file.core_object_name.as_bytes())?;
    put_blob(buf, "target directory", file.target_directory.as_bytes())?;
    buf.put_u32_le(file.checksum);
    put_blob(buf, "file data", &file.data)?;
    buf.put_u32_le(file.checksum);
    buf.put_u32_le(file.linked_module_checksum);
    put_blob(buf, "signature", file.signature.as_deref().unwrap_or_default())?;
    buf.put_u32_le(seq);
    buf.put_slice(END_MARKER);
    Ok(())
}

fn put_blob(buf: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<()> {
    buf.put_u32_le(to_u32(field, bytes.len())?);
    buf.put_slice(bytes);
    Ok(())
}

fn to_u32(field: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| StashError::FieldTooLarge { field, len })
}
