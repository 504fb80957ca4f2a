//! Configuration for driverstash
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{Result, StashError};

/// Main configuration for the install record store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backup Store Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the journal and displaced files
    /// Internal structure:
    ///   {backup_dir}/
    ///     ├── log              (uninstall journal)
    ///     ├── 100              (backup slot 100)
    ///     └── 101 ...
    pub backup_dir: PathBuf,

    /// File name of the journal inside `backup_dir`
    pub log_file_name: String,

    /// Permission bits the backup directory is created with and checked against
    pub dir_mode: u32,

    /// Permission bits the journal file is created with and checked against
    pub log_mode: u32,

    // -------------------------------------------------------------------------
    // Journal Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: whether each appended record is fsynced
    pub journal_sync: JournalSync,

    // -------------------------------------------------------------------------
    // Uninstall Configuration
    // -------------------------------------------------------------------------
    /// What to do when the journal permissions no longer match
    pub tamper_policy: TamperPolicy,
}

/// Journal sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalSync {
    /// fsync after every appended record (safest)
    EveryRecord,

    /// flush on close only, leave syncing to the OS
    OnClose,
}

/// Reaction to a journal whose permissions changed since creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TamperPolicy {
    /// Refuse to load the journal
    Refuse,

    /// Warn, load anyway, and mark the uninstall as best effort
    BestEffort,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/var/lib/driverstash"),
            log_file_name: "log".to_string(),
            dir_mode: 0o700,
            log_mode: 0o600,
            journal_sync: JournalSync::EveryRecord,
            tamper_policy: TamperPolicy::Refuse,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the journal file
    pub fn log_path(&self) -> PathBuf {
        self.backup_dir.join(&self.log_file_name)
    }

    /// Directory holding backup slot files
    pub fn store_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Check the configuration for values that would break the journal
    pub fn validate(&self) -> Result<()> {
        if self.log_file_name.is_empty() || self.log_file_name.contains('/') {
            return Err(StashError::Config(format!(
                "invalid journal file name '{}'",
                self.log_file_name
            )));
        }
        if self.log_file_name.parse::<u32>().is_ok() {
            // would collide with a backup slot file
            return Err(StashError::Config(format!(
                "journal file name '{}' is numeric",
                self.log_file_name
            )));
        }
        for (what, mode) in [("directory", self.dir_mode), ("journal", self.log_mode)] {
            if mode & 0o077 != 0 || mode & !0o777 != 0 {
                return Err(StashError::Config(format!(
                    "{} mode {:o} is not owner-only",
                    what, mode
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backup directory (root for the journal and backup store)
    pub fn backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = path.into();
        self
    }

    /// Set the journal file name
    pub fn log_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.log_file_name = name.into();
        self
    }

    /// Set the backup directory permission bits
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.config.dir_mode = mode;
        self
    }

    /// Set the journal file permission bits
    pub fn log_mode(mut self, mode: u32) -> Self {
        self.config.log_mode = mode;
        self
    }

    /// Set the journal sync strategy
    pub fn journal_sync(mut self, sync: JournalSync) -> Self {
        self.config.journal_sync = sync;
        self
    }

    /// Set the tamper policy used by the uninstaller
    pub fn tamper_policy(mut self, policy: TamperPolicy) -> Self {
        self.config.tamper_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
