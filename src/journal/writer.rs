//! Journal Writer
//!
//! Appends records to the journal during an install session. Every append
//! opens, writes, flushes and closes the file, so a crash between two
//! appends leaves the journal valid up to the last completed record.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::checksum::crc32_file;
use crate::config::{Config, JournalSync};
use crate::error::{Result, StashError};

use super::entry::{LogEntry, Ownership, FIRST_BACKUP_SLOT};
use super::reader::Journal;

/// Writes records to the journal of one install session
pub struct JournalWriter {
    /// Journal file
    log_path: PathBuf,
    /// Directory receiving displaced files, one per slot
    store_dir: PathBuf,
    /// Whether each append is fsynced
    sync: JournalSync,
    /// Next backup slot to hand out
    next_slot: u32,
}

impl JournalWriter {
    /// Start a new journal
    ///
    /// Creates the backup directory and a fresh log (owner-only permissions)
    /// holding the version and description header lines.
    pub fn create(config: &Config, version: &str, description: &str) -> Result<Self> {
        config.validate()?;
        for (what, value) in [("version", version), ("description", description)] {
            if value.contains('\n') {
                return Err(StashError::Unrepresentable(format!(
                    "{} contains a newline",
                    what
                )));
            }
        }

        let dir = &config.backup_dir;
        DirBuilder::new()
            .recursive(true)
            .mode(config.dir_mode)
            .create(dir)
            .map_err(|e| StashError::file(dir, e))?;
        // the umask may have narrowed the mode, or the directory already existed
        fs::set_permissions(dir, Permissions::from_mode(config.dir_mode))
            .map_err(|e| StashError::file(dir, e))?;

        let log_path = config.log_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(config.log_mode)
            .open(&log_path)
            .map_err(|e| StashError::file(&log_path, e))?;
        fs::set_permissions(&log_path, Permissions::from_mode(config.log_mode))
            .map_err(|e| StashError::file(&log_path, e))?;

        let mut writer = BufWriter::new(file);
        let header = format!("{}\n{}\n", version, description);
        writer
            .write_all(header.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| StashError::file(&log_path, e))?;
        if config.journal_sync == JournalSync::EveryRecord {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| StashError::file(&log_path, e))?;
        }

        let next_slot = first_free_slot(dir, None)?;
        info!(path = %log_path.display(), version, "created journal");

        Ok(Self {
            log_path,
            store_dir: dir.clone(),
            sync: config.journal_sync,
            next_slot,
        })
    }

    /// Resume appending to an existing journal
    ///
    /// The slot counter continues after the highest slot found in either the
    /// journal or the backup store.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let journal = Journal::load(config)?;
        let next_slot = first_free_slot(&config.backup_dir, journal.max_slot())?;

        debug!(
            path = %config.log_path().display(),
            entries = journal.len(),
            next_slot,
            "resumed journal"
        );

        Ok(Self {
            log_path: config.log_path(),
            store_dir: config.backup_dir.clone(),
            sync: config.journal_sync,
            next_slot,
        })
    }

    /// Append one record (open, write, flush, close)
    pub fn append_entry(&self, entry: &LogEntry) -> Result<()> {
        let bytes = entry.encode()?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .map_err(|e| StashError::file(&self.log_path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| StashError::file(&self.log_path, e))?;

        if self.sync == JournalSync::EveryRecord {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| StashError::file(&self.log_path, e))?;
        }

        debug!(kind = entry.kind.name(), path = %entry.path.display(), "journal append");
        Ok(())
    }

    /// Record a file the installer has just written
    pub fn record_installed_file(&self, path: &Path) -> Result<LogEntry> {
        let checksum = crc32_file(path)?;
        let entry = LogEntry::installed_file(path, checksum);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Record a symlink the installer has just created
    pub fn record_symlink(&self, path: &Path, target: &Path) -> Result<LogEntry> {
        let entry = LogEntry::installed_symlink(path, target);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Displace whatever currently occupies `path`
    ///
    /// - nothing there: `Ok(None)`
    /// - a symlink: recorded with its target and permissions, then removed
    /// - a regular file: recorded under the next slot, then moved into the
    ///   backup store
    ///
    /// The record is appended before the path is touched. A crash in between
    /// leaves the original in place and a record that validation rejects.
    pub fn backup(&mut self, path: &Path) -> Result<Option<LogEntry>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StashError::file(path, e)),
        };

        let ownership = Ownership {
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
        };
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| StashError::file(path, e))?;
            let entry = LogEntry::backed_up_symlink(path, target, ownership);
            self.append_entry(&entry)?;
            fs::remove_file(path).map_err(|e| StashError::file(path, e))?;
            Ok(Some(entry))
        } else if file_type.is_file() {
            let checksum = crc32_file(path)?;
            let slot = self.take_slot()?;
            let entry = LogEntry::backed_up_file(slot, path, checksum, ownership);
            self.append_entry(&entry)?;
            move_file(path, &self.stash_path(slot))?;
            debug!(path = %path.display(), slot, "backed up file");
            Ok(Some(entry))
        } else {
            Err(StashError::Unrepresentable(format!(
                "{} is neither a regular file nor a symlink",
                path.display()
            )))
        }
    }

    /// Slot the next backed-up file will receive
    pub fn next_slot(&self) -> u32 {
        self.next_slot
    }

    /// Location of a slot in the backup store
    pub fn stash_path(&self, slot: u32) -> PathBuf {
        self.store_dir.join(slot.to_string())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn take_slot(&mut self) -> Result<u32> {
        let slot = self.next_slot;
        self.next_slot = slot
            .checked_add(1)
            .ok_or_else(|| StashError::Unrepresentable("backup slots exhausted".to_string()))?;
        Ok(slot)
    }
}

/// First slot above everything in the journal and the backup store
fn first_free_slot(store_dir: &Path, journal_max: Option<u32>) -> Result<u32> {
    let mut max = journal_max;

    for entry in fs::read_dir(store_dir).map_err(|e| StashError::file(store_dir, e))? {
        let entry = entry.map_err(|e| StashError::file(store_dir, e))?;
        let slot = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
            .filter(|&n| n >= FIRST_BACKUP_SLOT);
        if let Some(slot) = slot {
            max = max.max(Some(slot));
        }
    }

    match max {
        Some(n) => n
            .checked_add(1)
            .ok_or_else(|| StashError::Unrepresentable("backup slots exhausted".to_string())),
        None => Ok(FIRST_BACKUP_SLOT),
    }
}

/// Rename `from` to `to`, copying when a rename is impossible (e.g. the
/// backup store is on another filesystem)
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(from = %from.display(), to = %to.display(), error = %rename_err, "rename failed, copying");
            fs::copy(from, to).map_err(|e| StashError::file(to, e))?;
            fs::remove_file(from).map_err(|e| StashError::file(from, e))
        }
    }
}
