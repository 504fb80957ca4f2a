//! Uninstaller
//!
//! Reverses an installation from its journal in two passes: every installed
//! path is removed first, then every displaced path is restored. Removing
//! first guarantees a restoration never collides with an installed file or
//! symlink still sitting on its path, whatever the journal order.

use std::fs::{self, Permissions};
use std::os::unix::fs::{chown, lchown, symlink, PermissionsExt};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{Config, TamperPolicy};
use crate::error::{Result, StashError};
use crate::journal::{move_file, EntryKind, Journal, LogEntry, Ownership};

use super::validate::{validate, ValidationReport};

/// Outcome of an uninstall run
#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
    /// Driver version from the journal header
    pub version: String,

    /// Driver description from the journal header
    pub description: String,

    /// Installed paths removed in pass 1
    pub removed: usize,

    /// Displaced paths restored in pass 2
    pub restored: usize,

    /// Entries whose removal or restoration failed
    pub failed: usize,

    /// Entries skipped because validation rejected them
    pub invalid: usize,

    /// The journal permissions had changed and it was loaded anyway
    pub tampered: bool,

    /// The journal and backup store were left in place
    pub backup_dir_kept: bool,

    /// One line per problem, naming the path involved
    pub warnings: Vec<String>,
}

impl UninstallReport {
    /// True when anything was skipped, failed, or the journal was untrusted
    pub fn best_effort(&self) -> bool {
        self.tampered || self.invalid > 0 || self.failed > 0
    }
}

/// Handles uninstall and self-test against the journal
pub struct Uninstaller {
    config: Config,
}

impl Uninstaller {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Validate the journal against the live system without changing it
    pub fn sanity_check(&self) -> Result<ValidationReport> {
        let (mut journal, _) = self.load()?;
        let report = validate(&mut journal.entries, self.config.store_dir());
        if report.is_intact() {
            info!(entries = report.checked, "installation intact");
        } else {
            warn!(
                invalid = report.invalid_count(),
                entries = report.checked,
                "installation has been modified"
            );
        }
        Ok(report)
    }

    /// Reverse the installation recorded in the journal
    ///
    /// 1. Load the journal (tamper handling per `TamperPolicy`)
    /// 2. Validate every entry
    /// 3. Remove valid installed files and symlinks
    /// 4. Restore valid backed-up symlinks and files
    /// 5. Remove the backup directory, unless a failed or skipped entry
    ///    leaves displaced files in the backup store
    pub fn run(&self) -> Result<UninstallReport> {
        let (mut journal, tampered) = self.load()?;
        let mut report = UninstallReport {
            version: journal.version.clone(),
            description: journal.description.clone(),
            tampered,
            ..Default::default()
        };
        if tampered {
            report
                .warnings
                .push("journal permissions changed; uninstall is best effort".to_string());
        }

        let validation = validate(&mut journal.entries, self.config.store_dir());
        report.invalid = validation.invalid_count();
        for diag in &validation.diagnostics {
            report
                .warnings
                .push(format!("{}: {}", diag.path.display(), diag.reason));
        }
        if !validation.is_intact() {
            warn!(
                invalid = report.invalid,
                "installation changed since install; uninstall is best effort"
            );
        }

        for entry in journal.entries.iter().filter(|e| e.valid) {
            if let EntryKind::InstalledFile { .. } | EntryKind::InstalledSymlink { .. } = entry.kind
            {
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        debug!(path = %entry.path.display(), "removed");
                        report.removed += 1;
                    }
                    Err(e) => record_failure(&mut report, entry, "remove", &StashError::Io(e)),
                }
            }
        }

        for entry in journal.entries.iter().filter(|e| e.valid) {
            let outcome = match &entry.kind {
                EntryKind::BackedUpSymlink { target, ownership } => {
                    restore_symlink(&entry.path, target, *ownership)
                }
                EntryKind::BackedUpFile {
                    slot, ownership, ..
                } => self.restore_file(&entry.path, *slot, *ownership),
                _ => continue,
            };
            match outcome {
                Ok(()) => {
                    debug!(path = %entry.path.display(), "restored");
                    report.restored += 1;
                }
                Err(e) => record_failure(&mut report, entry, "restore", &e),
            }
        }

        let dir = &self.config.backup_dir;
        let unrestored = journal
            .entries
            .iter()
            .any(|e| !e.valid && matches!(e.kind, EntryKind::BackedUpFile { .. }));
        if report.failed > 0 || unrestored {
            // the store may hold the only copy of a displaced file
            report.backup_dir_kept = true;
            warn!(path = %dir.display(), "keeping backup directory, some entries were not restored");
            report.warnings.push(format!(
                "{}: kept journal and backup store, some entries were not restored",
                dir.display()
            ));
        } else if let Err(e) = fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove backup directory");
            report
                .warnings
                .push(format!("{}: failed to remove backup directory: {}", dir.display(), e));
        }

        info!(
            version = %report.version,
            removed = report.removed,
            restored = report.restored,
            failed = report.failed,
            invalid = report.invalid,
            "uninstall finished"
        );
        Ok(report)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Load the journal; the flag reports a tamper signal that was overridden
    fn load(&self) -> Result<(Journal, bool)> {
        match Journal::load(&self.config) {
            Ok(journal) => Ok((journal, false)),
            Err(e) if e.is_tamper() && self.config.tamper_policy == TamperPolicy::BestEffort => {
                warn!(error = %e, "continuing with an untrusted journal");
                Ok((Journal::load_unchecked(&self.config)?, true))
            }
            Err(e) => Err(e),
        }
    }

    fn restore_file(&self, path: &Path, slot: u32, ownership: Ownership) -> Result<()> {
        let stash = self.config.store_dir().join(slot.to_string());
        move_file(&stash, path)?;
        // chown may clear setuid/setgid, so the mode goes last
        chown(path, Some(ownership.uid), Some(ownership.gid))
            .map_err(|e| StashError::file(path, e))?;
        fs::set_permissions(path, Permissions::from_mode(ownership.mode))
            .map_err(|e| StashError::file(path, e))
    }
}

fn restore_symlink(path: &Path, target: &Path, ownership: Ownership) -> Result<()> {
    symlink(target, path).map_err(|e| StashError::file(path, e))?;
    lchown(path, Some(ownership.uid), Some(ownership.gid)).map_err(|e| StashError::file(path, e))
}

fn record_failure(report: &mut UninstallReport, entry: &LogEntry, action: &str, error: &StashError) {
    warn!(path = %entry.path.display(), error = %error, "failed to {}", action);
    report.failed += 1;
    report
        .warnings
        .push(format!("{}: failed to {}: {}", entry.path.display(), action, error));
}
