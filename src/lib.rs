//! # driverstash
//!
//! Durable records for a native driver installer:
//! - Uninstall journal recording every file installed, symlinked or displaced
//! - Backup store holding displaced files by slot number
//! - Two-pass uninstall (remove, then restore) validated against the live system
//! - Precompiled package containers with per-file CRC verification
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │      Install session     │        │   Driver setup / search  │
//! │     (JournalWriter)      │        │  (find_package, pack)    │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │ append                            │
//!              ▼                                   ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │         Journal          │        │   Package codec          │
//! │  (text, owner-only dir)  │        │  (length-prefixed binary)│
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │ load                              │
//!              ▼                                   │
//! ┌──────────────────────────┐                     │
//! │       Uninstaller        │                     │
//! │ validate → remove →      │                     │
//! │ restore                  │                     │
//! └────────────┬─────────────┘                     │
//!              └──────────────┬────────────────────┘
//!                             ▼
//!                   ┌──────────────────┐
//!                   │     CRC-32       │
//!                   └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod checksum;
pub mod journal;
pub mod package;
pub mod uninstall;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use checksum::{crc32, crc32_file};
pub use config::Config;
pub use error::{Result, StashError};
pub use journal::{Journal, JournalWriter, LogEntry};
pub use package::{FileRecord, PackageContainer};
pub use uninstall::{UninstallReport, Uninstaller};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of driverstash
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
