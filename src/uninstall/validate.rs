//! Validation pass
//!
//! Cross-checks every journal record against the live filesystem and marks
//! the records that must not take part in the uninstall. Validation never
//! fails; it only narrows the set of valid entries.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checksum::crc32_file;
use crate::journal::{EntryKind, LogEntry};

/// Why one record was marked invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Number of records examined
    pub checked: usize,
    /// One diagnostic per invalid record
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// True when every record still matches the live system
    pub fn is_intact(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn invalid_count(&self) -> usize {
        self.diagnostics.len()
    }
}

/// Validate `entries` in place, setting each entry's `valid` flag
///
/// - installed file: must exist with the recorded CRC
/// - installed symlink: must exist with the recorded target; otherwise every
///   backed-up symlink at the same path is invalidated too
/// - backed-up symlink: governed only by the rule above
/// - backed-up file: the slot file in `store_dir` must exist with the
///   recorded CRC
pub fn validate(entries: &mut [LogEntry], store_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport {
        checked: entries.len(),
        diagnostics: Vec::new(),
    };

    // backed-up symlinks by path, for the cascade
    let mut displaced_links: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.valid = true;
        if matches!(entry.kind, EntryKind::BackedUpSymlink { .. }) {
            displaced_links.entry(entry.path.clone()).or_default().push(i);
        }
    }

    let mut cascade = Vec::new();
    for entry in entries.iter_mut() {
        let problem = match &entry.kind {
            EntryKind::InstalledFile { checksum } => check_file(&entry.path, *checksum),
            EntryKind::InstalledSymlink { target } => {
                let problem = check_symlink(&entry.path, target);
                if problem.is_some() {
                    if let Some(linked) = displaced_links.get(&entry.path) {
                        cascade.extend(linked.iter().copied());
                    }
                }
                problem
            }
            EntryKind::BackedUpSymlink { .. } => None,
            EntryKind::BackedUpFile { slot, checksum, .. } => {
                check_file(&store_dir.join(slot.to_string()), *checksum)
                    .map(|reason| format!("backup slot {}: {}", slot, reason))
            }
        };

        if let Some(reason) = problem {
            invalidate(entry, reason, &mut report);
        }
    }

    for i in cascade {
        let entry = &mut entries[i];
        if entry.valid {
            invalidate(
                entry,
                "installed symlink at this path changed; not restoring the previous symlink"
                    .to_string(),
                &mut report,
            );
        }
    }

    report
}

fn invalidate(entry: &mut LogEntry, reason: String, report: &mut ValidationReport) {
    warn!(
        path = %entry.path.display(),
        kind = entry.kind.name(),
        %reason,
        "journal entry invalid"
    );
    entry.valid = false;
    report.diagnostics.push(Diagnostic {
        path: entry.path.clone(),
        reason,
    });
}

fn check_file(path: &Path, recorded: u32) -> Option<String> {
    match crc32_file(path) {
        Ok(crc) if crc == recorded => None,
        Ok(crc) => Some(format!(
            "modified since recorded (checksum {}, expected {})",
            crc, recorded
        )),
        Err(e) => Some(format!("missing or unreadable ({})", e)),
    }
}

fn check_symlink(path: &Path, recorded: &Path) -> Option<String> {
    match fs::read_link(path) {
        Ok(target) if target == recorded => None,
        Ok(target) => Some(format!(
            "symlink target changed to {} (expected {})",
            target.display(),
            recorded.display()
        )),
        Err(e) => Some(format!("symlink missing ({})", e)),
    }
}
