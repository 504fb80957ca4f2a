//! Package Reader
//!
//! Decodes a package buffer with bounds-checked reads, verifying the magic,
//! the format version and the redundant markers of every file record.

use tracing::{debug, warn};

use crate::checksum::crc32;
use crate::error::{Result, StashError};

use super::cursor::ByteCursor;
use super::record::{FileAttributes, FileKind, FileRecord, PackageContainer};
use super::{END_MARKER, FILE_MARKER, FORMAT_VERSION, MAGIC};

/// Versions a package must have been built for
///
/// `None` accepts any value for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    pub driver_version: Option<String>,
    pub kernel_version: Option<String>,
}

impl Expectation {
    pub fn new(driver_version: impl Into<String>, kernel_version: impl Into<String>) -> Self {
        Self {
            driver_version: Some(driver_version.into()),
            kernel_version: Some(kernel_version.into()),
        }
    }

    /// Accept any driver and kernel version
    pub fn any() -> Self {
        Self::default()
    }

    /// Why a package with these header strings does not apply, if it doesn't
    fn mismatch(&self, version: &str, kernel: &str) -> Option<String> {
        if let Some(expected) = &self.driver_version {
            if expected != version {
                return Some(format!(
                    "built for driver version '{}', not '{}'",
                    version, expected
                ));
            }
        }
        if let Some(expected) = &self.kernel_version {
            if expected != kernel {
                return Some(format!("built for kernel '{}', not '{}'", kernel, expected));
            }
        }
        None
    }
}

/// Result of unpacking a well-formed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    /// Built for the expected driver and kernel
    Applicable(PackageContainer),

    /// Well formed, but built for something else
    NotApplicable(String),
}

impl Applicability {
    pub fn into_container(self) -> Option<PackageContainer> {
        match self {
            Applicability::Applicable(container) => Some(container),
            Applicability::NotApplicable(_) => None,
        }
    }
}

/// Decode a package without checking what it was built for
pub fn decode(bytes: &[u8]) -> Result<PackageContainer> {
    match unpack(bytes, &Expectation::any())? {
        Applicability::Applicable(container) => Ok(container),
        Applicability::NotApplicable(reason) => Err(StashError::PackageCorruption(reason)),
    }
}

/// Decode a package, stopping after the string header if it was built for
/// another driver or kernel version
///
/// A data checksum that does not match the data is logged, not fatal; use
/// `FileRecord::is_intact` before using a file.
pub fn unpack(bytes: &[u8], expect: &Expectation) -> Result<Applicability> {
    let mut cursor = ByteCursor::new(bytes);

    let magic = cursor.read_bytes("magic", MAGIC.len())?;
    if magic != MAGIC {
        return Err(StashError::BadMagic);
    }

    let format_version = cursor.read_u32("format version")?;
    if format_version != FORMAT_VERSION {
        return Err(StashError::FormatVersion {
            expected: FORMAT_VERSION,
            found: format_version,
        });
    }

    let version = cursor.read_string("version")?;
    let description = cursor.read_string("description")?;
    let target_kernel = cursor.read_string("kernel version")?;

    if let Some(reason) = expect.mismatch(&version, &target_kernel) {
        debug!(%reason, "package not applicable");
        return Ok(Applicability::NotApplicable(reason));
    }

    let count = cursor.read_u32("file count")?;
    let mut files = Vec::new();
    for seq in 0..count {
        files.push(decode_record(&mut cursor, seq)?);
    }

    if cursor.remaining() != 0 {
        return Err(StashError::PackageCorruption(format!(
            "{} trailing bytes after {} file records",
            cursor.remaining(),
            count
        )));
    }

    Ok(Applicability::Applicable(PackageContainer {
        format_version,
        version,
        description,
        target_kernel,
        files,
    }))
}

fn decode_record(cursor: &mut ByteCursor<'_>, expected_seq: u32) -> Result<FileRecord> {
    cursor.expect_marker("file marker", FILE_MARKER)?;

    let seq = cursor.read_u32("sequence number")?;
    if seq != expected_seq {
        return Err(StashError::PackageCorruption(format!(
            "file record {} carries sequence number {}",
            expected_seq, seq
        )));
    }

    let raw_kind = cursor.read_u32("file kind")?;
    let kind = FileKind::from_u32(raw_kind).ok_or_else(|| {
        StashError::PackageCorruption(format!(
            "file record {}: unknown file kind {}",
            seq, raw_kind
        ))
    })?;
    let attributes = FileAttributes::from_bits_retain(cursor.read_u32("attributes")?);

    let name = cursor.read_string("file name")?;
    let linked_module_name = cursor.read_string("linked module name")?;
    let core_object_name = cursor.read_string("core object name")?;
    let target_directory = cursor.read_string("target directory")?;

    let checksum = cursor.read_u32("file checksum")?;
    let data = cursor.read_blob("file data")?.to_vec();
    let checksum_copy = cursor.read_u32("file checksum copy")?;
    if checksum != checksum_copy {
        return Err(StashError::PackageCorruption(format!(
            "'{}': checksum copies disagree ({} vs {})",
            name, checksum, checksum_copy
        )));
    }

    let linked_module_checksum = cursor.read_u32("linked module checksum")?;

    let signature = cursor.read_blob("signature")?;
    let signature = if attributes.contains(FileAttributes::DETACHED_SIGNATURE) {
        Some(signature.to_vec())
    } else if signature.is_empty() {
        None
    } else {
        return Err(StashError::PackageCorruption(format!(
            "'{}': {} signature bytes without the signature attribute",
            name,
            signature.len()
        )));
    };

    let seq_copy = cursor.read_u32("sequence number copy")?;
    if seq_copy != seq {
        return Err(StashError::PackageCorruption(format!(
            "'{}': sequence numbers disagree ({} vs {})",
            name, seq, seq_copy
        )));
    }
    cursor.expect_marker("end marker", END_MARKER)?;

    let actual = crc32(&data);
    if actual != checksum {
        warn!(
            file = %name,
            recorded = checksum,
            computed = actual,
            "embedded file checksum mismatch"
        );
    }

    Ok(FileRecord {
        kind,
        attributes,
        name,
        linked_module_name,
        core_object_name,
        target_directory,
        checksum,
        data,
        linked_module_checksum,
        signature,
    })
}
