//! Uninstall Module
//!
//! Validates a loaded journal against the live filesystem and reverses the
//! installation it describes.
//!
//! ## Responsibilities
//! - Mark entries whose live state no longer matches the journal
//! - Invalidate displaced symlinks whose path was taken over since install
//! - Remove installed paths, then restore displaced ones
//! - Self-test an installation without modifying it

mod uninstaller;
mod validate;

pub use uninstaller::{UninstallReport, Uninstaller};
pub use validate::{validate, Diagnostic, ValidationReport};
