//! Package Module
//!
//! Precompiled package: a self-describing container bundling kernel
//! interface objects and/or modules with the driver and kernel versions they
//! were built for, so a matching build can be reused instead of recompiled.
//!
//! ## File Format
//! All integers are u32 little-endian. `blob` = u32 length + bytes.
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header                                                  │
//! │   Magic "\aNVIDIA\a" (8) | Format version (4)           │
//! │   version blob | description blob | kernel blob         │
//! │   File count (4)                                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ File record (repeated file-count times)                 │
//! │   "FILE" | seq | kind | attributes                      │
//! │   name | linked module name | core object | target dir  │
//! │   crc | data blob | crc copy | linked module crc        │
//! │   signature blob | seq copy | "END."                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `seq` runs 0..count and must match the record's position; both copies of
//! `seq` and of the data crc must agree.

mod builder;
mod cursor;
mod reader;
mod record;
mod search;

pub use builder::{encoded_len, pack};
pub use reader::{decode, unpack, Applicability, Expectation};
pub use record::{FileAttributes, FileKind, FileRecord, PackageContainer};
pub use search::{extract_file, find_package, read_package, write_package, FoundPackage};

// =============================================================================
// Shared Constants (used by builder and reader)
// =============================================================================

/// Magic bytes identifying a precompiled package
pub const MAGIC: &[u8; 8] = b"\x07NVIDIA\x07";

/// Current package format version
pub const FORMAT_VERSION: u32 = 1;

/// Opens every file record
pub(crate) const FILE_MARKER: &[u8; 4] = b"FILE";

/// Closes every file record
pub(crate) const END_MARKER: &[u8; 4] = b"END.";
