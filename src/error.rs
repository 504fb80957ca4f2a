//! Error types for driverstash
//!
//! Provides a unified error type for all operations.
//!
//! Semantic mismatches (a modified file, a changed symlink target, a container
//! built for another kernel) are not errors; they surface as values from the
//! validation and search code.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StashError
pub type Result<T> = std::result::Result<T, StashError>;

/// Unified error type for driverstash operations
#[derive(Debug, Error)]
pub enum StashError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Journal Errors
    // -------------------------------------------------------------------------
    #[error("journal corruption at line {line}: {reason}")]
    JournalCorruption { line: usize, reason: String },

    #[error(
        "{} has permissions {found:o}, expected {expected:o}; the journal may have been tampered with",
        path.display()
    )]
    Tampered {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("cannot be recorded in the journal: {0}")]
    Unrepresentable(String),

    #[error("no journal found at {}", .0.display())]
    NoJournal(PathBuf),

    // -------------------------------------------------------------------------
    // Package Errors
    // -------------------------------------------------------------------------
    #[error("package truncated reading {field}: need {needed} bytes, {remaining} remaining")]
    PackageTruncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("not a precompiled package (bad magic)")]
    BadMagic,

    #[error("unsupported package format version {found} (expected {expected})")]
    FormatVersion { expected: u32, found: u32 },

    #[error("package corruption: {0}")]
    PackageCorruption(String),

    #[error("{field} is too large to encode ({len} bytes)")]
    FieldTooLarge { field: &'static str, len: usize },

    #[error("file '{0}' not present in package")]
    FileNotInPackage(String),

    #[error("checksum mismatch for '{name}': recorded {expected}, computed {found}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        found: u32,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StashError {
    /// Wrap an I/O error with the path it concerns
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StashError::File {
            path: path.into(),
            source,
        }
    }

    /// True for errors that mean the journal permissions changed
    pub fn is_tamper(&self) -> bool {
        matches!(self, StashError::Tampered { .. })
    }
}
