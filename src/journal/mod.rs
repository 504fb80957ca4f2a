//! Journal Module
//!
//! Append-only text record of one installation, used to reverse it later.
//!
//! ## Responsibilities
//! - Create the backup directory and journal with owner-only permissions
//! - Append one self-contained record per installed or displaced path
//! - Hand out monotonically increasing backup slots
//! - Load the whole journal back, rejecting it if corrupt or tampered with
//!
//! ## File Format
//! ```text
//! <version string>
//! <description string>
//! 1: <path>                      installed file
//! <crc>
//! 2: <path>                      installed symlink
//! <target>
//! 3: <path>                      backed-up symlink
//! <target>
//! <mode-octal> <uid> <gid>
//! <slot>: <path>                 backed-up file, slot >= 100
//! <crc> <mode-octal> <uid> <gid>
//! ```
//!
//! The backup store is the journal's directory: one file per backed-up file,
//! named by its decimal slot number.

mod entry;
mod reader;
mod writer;

pub use entry::{
    EntryKind, LogEntry, Ownership, BACKED_UP_SYMLINK, FIRST_BACKUP_SLOT, INSTALLED_FILE,
    INSTALLED_SYMLINK,
};
pub use reader::{check_permissions, installed_driver_info, Journal};
pub use writer::JournalWriter;

pub(crate) use writer::move_file;
