//! Journal entry definitions
//!
//! Defines the structure of individual journal records and their text
//! encoding.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StashError};

/// Record id of an installed regular file
pub const INSTALLED_FILE: u32 = 1;

/// Record id of an installed symlink
pub const INSTALLED_SYMLINK: u32 = 2;

/// Record id of a displaced symlink
pub const BACKED_UP_SYMLINK: u32 = 3;

/// First backup slot number; every id at or above this is a slot
pub const FIRST_BACKUP_SLOT: u32 = 100;

/// POSIX permission triple captured when something is displaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    /// Permission bits (no file type bits)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// What a journal record describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A file the installer wrote; removed on uninstall
    InstalledFile { checksum: u32 },

    /// A symlink the installer created; removed on uninstall
    InstalledSymlink { target: PathBuf },

    /// A symlink the installer displaced; recreated on uninstall
    BackedUpSymlink { target: PathBuf, ownership: Ownership },

    /// A regular file moved into the backup store under `slot`
    BackedUpFile {
        slot: u32,
        checksum: u32,
        ownership: Ownership,
    },
}

/// A single record in the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: EntryKind,

    /// Original absolute path the record refers to
    pub path: PathBuf,

    /// Computed by validation, never persisted
    pub valid: bool,
}

impl EntryKind {
    /// The id written at the start of the record's first line
    pub fn id(&self) -> u32 {
        match self {
            EntryKind::InstalledFile { .. } => INSTALLED_FILE,
            EntryKind::InstalledSymlink { .. } => INSTALLED_SYMLINK,
            EntryKind::BackedUpSymlink { .. } => BACKED_UP_SYMLINK,
            EntryKind::BackedUpFile { slot, .. } => *slot,
        }
    }

    /// Short name used in diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::InstalledFile { .. } => "installed file",
            EntryKind::InstalledSymlink { .. } => "installed symlink",
            EntryKind::BackedUpSymlink { .. } => "backed-up symlink",
            EntryKind::BackedUpFile { .. } => "backed-up file",
        }
    }
}

impl LogEntry {
    pub fn new(kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            valid: true,
        }
    }

    pub fn installed_file(path: impl Into<PathBuf>, checksum: u32) -> Self {
        Self::new(EntryKind::InstalledFile { checksum }, path)
    }

    pub fn installed_symlink(path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::new(
            EntryKind::InstalledSymlink {
                target: target.into(),
            },
            path,
        )
    }

    pub fn backed_up_symlink(
        path: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        ownership: Ownership,
    ) -> Self {
        Self::new(
            EntryKind::BackedUpSymlink {
                target: target.into(),
                ownership,
            },
            path,
        )
    }

    pub fn backed_up_file(
        slot: u32,
        path: impl Into<PathBuf>,
        checksum: u32,
        ownership: Ownership,
    ) -> Self {
        Self::new(
            EntryKind::BackedUpFile {
                slot,
                checksum,
                ownership,
            },
            path,
        )
    }

    /// Backup slot, for `BackedUpFile` records only
    pub fn slot(&self) -> Option<u32> {
        match self.kind {
            EntryKind::BackedUpFile { slot, .. } => Some(slot),
            _ => None,
        }
    }

    /// Symlink target, for the symlink variants only
    pub fn target(&self) -> Option<&Path> {
        match &self.kind {
            EntryKind::InstalledSymlink { target } | EntryKind::BackedUpSymlink { target, .. } => {
                Some(target.as_path())
            }
            _ => None,
        }
    }

    /// Recorded CRC-32, for the file variants only
    pub fn checksum(&self) -> Option<u32> {
        match self.kind {
            EntryKind::InstalledFile { checksum } | EntryKind::BackedUpFile { checksum, .. } => {
                Some(checksum)
            }
            _ => None,
        }
    }

    pub fn ownership(&self) -> Option<Ownership> {
        match self.kind {
            EntryKind::BackedUpSymlink { ownership, .. }
            | EntryKind::BackedUpFile { ownership, .. } => Some(ownership),
            _ => None,
        }
    }

    /// Encode this record in journal text form
    ///
    /// ```text
    /// 1: <path>\n<crc>\n
    /// 2: <path>\n<target>\n
    /// 3: <path>\n<target>\n<mode> <uid> <gid>\n
    /// <slot>: <path>\n<crc> <mode> <uid> <gid>\n
    /// ```
    pub fn encode(&self) -> Result<Vec<u8>> {
        if let EntryKind::BackedUpFile { slot, .. } = self.kind {
            if slot < FIRST_BACKUP_SLOT {
                return Err(StashError::Unrepresentable(format!(
                    "backup slot {} is below {}",
                    slot, FIRST_BACKUP_SLOT
                )));
            }
        }

        let path = line_bytes(self.path.as_os_str(), "path")?;
        let mut out = Vec::with_capacity(path.len() + 64);
        out.extend_from_slice(format!("{}: ", self.kind.id()).as_bytes());
        out.extend_from_slice(path);
        out.push(b'\n');

        match &self.kind {
            EntryKind::InstalledFile { checksum } => {
                out.extend_from_slice(format!("{}\n", checksum).as_bytes());
            }
            EntryKind::InstalledSymlink { target } => {
                out.extend_from_slice(line_bytes(target.as_os_str(), "symlink target")?);
                out.push(b'\n');
            }
            EntryKind::BackedUpSymlink { target, ownership } => {
                out.extend_from_slice(line_bytes(target.as_os_str(), "symlink target")?);
                out.push(b'\n');
                out.extend_from_slice(
                    format!("{:o} {} {}\n", ownership.mode, ownership.uid, ownership.gid)
                        .as_bytes(),
                );
            }
            EntryKind::BackedUpFile {
                checksum,
                ownership,
                ..
            } => {
                out.extend_from_slice(
                    format!(
                        "{} {:o} {} {}\n",
                        checksum, ownership.mode, ownership.uid, ownership.gid
                    )
                    .as_bytes(),
                );
            }
        }

        Ok(out)
    }
}

/// Raw bytes of a single journal line; a newline would split the record
pub(crate) fn line_bytes<'a>(value: &'a OsStr, what: &str) -> Result<&'a [u8]> {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return Err(StashError::Unrepresentable(format!("empty {}", what)));
    }
    if bytes.contains(&b'\n') {
        return Err(StashError::Unrepresentable(format!(
            "{} contains a newline: {:?}",
            what, value
        )));
    }
    Ok(bytes)
}
