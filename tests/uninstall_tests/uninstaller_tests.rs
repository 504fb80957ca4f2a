//! Tests for the two-pass uninstaller

use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use driverstash::config::{Config, TamperPolicy};
use driverstash::journal::{JournalWriter, LogEntry, Ownership};
use driverstash::uninstall::Uninstaller;
use driverstash::{crc32, StashError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    temp: TempDir,
    config: Config,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let config = Config::builder()
            .backup_dir(temp.path().join("backup"))
            .build();
        Self { temp, config, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn writer(&self) -> JournalWriter {
        JournalWriter::create(&self.config, "2.0", "Example Driver").unwrap()
    }

    fn uninstaller(&self) -> Uninstaller {
        Uninstaller::new(self.config.clone())
    }

    /// Ownership of a file the test user creates
    fn own(&self, mode: u32) -> Ownership {
        let meta = fs::metadata(self.temp.path()).unwrap();
        Ownership {
            mode,
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

// =============================================================================
// Full Cycle Tests
// =============================================================================

#[test]
fn test_uninstall_reverses_install() {
    let fx = Fixture::new();
    let lib = fx.path("libGL.so.1");
    let link = fx.path("libGL.so");
    let fresh = fx.path("nvidia.ko");
    fs::write(&lib, b"vendor library").unwrap();
    fs::set_permissions(&lib, fs::Permissions::from_mode(0o640)).unwrap();
    symlink("libGL.so.1", &link).unwrap();

    // install: displace both, then put ours in place
    let mut writer = fx.writer();
    writer.backup(&lib).unwrap();
    fs::write(&lib, b"our library").unwrap();
    writer.record_installed_file(&lib).unwrap();
    writer.backup(&link).unwrap();
    symlink("libGL.so.550", &link).unwrap();
    writer.record_symlink(&link, Path::new("libGL.so.550")).unwrap();
    fs::write(&fresh, b"module").unwrap();
    writer.record_installed_file(&fresh).unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.version, "2.0");
    assert_eq!(report.description, "Example Driver");
    assert_eq!(report.removed, 3);
    assert_eq!(report.restored, 2);
    assert_eq!(report.failed, 0);
    assert!(!report.best_effort());
    assert!(report.warnings.is_empty());

    assert_eq!(fs::read(&lib).unwrap(), b"vendor library");
    assert_eq!(mode_of(&lib), 0o640);
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("libGL.so.1"));
    assert!(!fresh.exists());
    assert!(!fx.config.backup_dir.exists());
}

#[test]
fn test_uninstall_empty_journal() {
    let fx = Fixture::new();
    fx.writer();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.removed + report.restored, 0);
    assert!(!fx.config.backup_dir.exists());
}

#[test]
fn test_uninstall_without_journal_fails() {
    let fx = Fixture::new();

    let result = fx.uninstaller().run();

    assert!(matches!(result, Err(StashError::NoJournal(_))));
}

// =============================================================================
// Two-Phase Ordering Tests
// =============================================================================

#[test]
fn test_restore_onto_path_of_installed_symlink() {
    let fx = Fixture::new();
    let p = fx.path("p");
    fs::write(&p, b"backed-up content").unwrap();

    let mut writer = fx.writer();
    writer.backup(&p).unwrap();
    symlink("elsewhere", &p).unwrap();
    writer.record_symlink(&p, Path::new("elsewhere")).unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert!(!report.best_effort());
    let meta = fs::symlink_metadata(&p).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(fs::read(&p).unwrap(), b"backed-up content");
}

#[test]
fn test_restore_independent_of_journal_order() {
    let fx = Fixture::new();
    let p = fx.path("p");
    let writer = fx.writer();

    // the installed symlink is recorded before the backup that shares its path
    symlink("elsewhere", &p).unwrap();
    writer
        .append_entry(&LogEntry::installed_symlink(&p, "elsewhere"))
        .unwrap();
    fs::write(fx.config.backup_dir.join("100"), b"original").unwrap();
    writer
        .append_entry(&LogEntry::backed_up_file(
            100,
            &p,
            crc32(b"original"),
            fx.own(0o600),
        ))
        .unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!((report.removed, report.restored, report.failed), (1, 1, 0));
    assert!(fs::symlink_metadata(&p).unwrap().file_type().is_file());
    assert_eq!(fs::read(&p).unwrap(), b"original");
    assert_eq!(mode_of(&p), 0o600);
}

// =============================================================================
// Best-Effort Tests
// =============================================================================

#[test]
fn test_modified_file_is_left_alone() {
    let fx = Fixture::new();
    let kept = fx.path("edited.conf");
    let removed = fx.path("lib.so");
    let writer = fx.writer();
    fs::write(&kept, b"ours").unwrap();
    writer.record_installed_file(&kept).unwrap();
    fs::write(&removed, b"ours too").unwrap();
    writer.record_installed_file(&removed).unwrap();
    fs::write(&kept, b"edited by the admin").unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert!(report.best_effort());
    assert_eq!(report.invalid, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(fs::read(&kept).unwrap(), b"edited by the admin");
    assert!(!removed.exists());
    assert!(report.warnings.iter().any(|w| w.contains("edited.conf")));
}

#[test]
fn test_changed_symlink_blocks_restore() {
    let fx = Fixture::new();
    let p = fx.path("libGL.so");
    symlink("vendor", &p).unwrap();

    let mut writer = fx.writer();
    writer.backup(&p).unwrap();
    symlink("ours", &p).unwrap();
    writer.record_symlink(&p, Path::new("ours")).unwrap();

    // someone else repoints the link after install
    fs::remove_file(&p).unwrap();
    symlink("third-party", &p).unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.invalid, 2);
    assert_eq!(report.removed + report.restored, 0);
    assert_eq!(fs::read_link(&p).unwrap(), Path::new("third-party"));
}

#[test]
fn test_restore_failure_does_not_stop_pass() {
    let fx = Fixture::new();
    let blocked = fx.path("blocked");
    let fine = fx.path("fine");
    let writer = fx.writer();

    // something unrelated now occupies the symlink's path
    fs::write(&blocked, b"squatter").unwrap();
    writer
        .append_entry(&LogEntry::backed_up_symlink(&blocked, "t", fx.own(0o777)))
        .unwrap();
    writer
        .append_entry(&LogEntry::backed_up_symlink(&fine, "t", fx.own(0o777)))
        .unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.restored, 1);
    assert!(report.best_effort());
    assert_eq!(fs::read_link(&fine).unwrap(), Path::new("t"));
    assert_eq!(fs::read(&blocked).unwrap(), b"squatter");
}

#[test]
fn test_failed_restore_keeps_backup_store() {
    let fx = Fixture::new();
    let sub = fx.path("sub");
    fs::create_dir(&sub).unwrap();
    let lib = sub.join("libfoo.so");
    fs::write(&lib, b"displaced original").unwrap();

    let mut writer = fx.writer();
    let slot = writer.backup(&lib).unwrap().unwrap().slot().unwrap();
    let stash = writer.stash_path(slot);
    // the parent directory vanishes, so the file cannot be moved back
    fs::remove_dir(&sub).unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.failed, 1);
    assert!(report.backup_dir_kept);
    assert!(report.warnings.iter().any(|w| w.contains("kept journal")));
    assert_eq!(fs::read(&stash).unwrap(), b"displaced original");
    assert!(fx.config.log_path().exists());
}

#[test]
fn test_invalid_backup_keeps_backup_store() {
    let fx = Fixture::new();
    let lib = fx.path("libfoo.so");
    fs::write(&lib, b"original").unwrap();

    let mut writer = fx.writer();
    let slot = writer.backup(&lib).unwrap().unwrap().slot().unwrap();
    fs::write(writer.stash_path(slot), b"changed in the store").unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert_eq!(report.invalid, 1);
    assert_eq!(report.failed, 0);
    assert!(report.backup_dir_kept);
    assert!(writer.stash_path(slot).exists());
}

#[test]
fn test_successful_uninstall_removes_backup_store() {
    let fx = Fixture::new();
    let lib = fx.path("libfoo.so");
    fs::write(&lib, b"original").unwrap();
    fx.writer().backup(&lib).unwrap();

    let report = fx.uninstaller().run().unwrap();

    assert!(!report.backup_dir_kept);
    assert!(!fx.config.backup_dir.exists());
    assert_eq!(fs::read(&lib).unwrap(), b"original");
}

// =============================================================================
// Tamper Policy Tests
// =============================================================================

#[test]
fn test_tampered_journal_refused() {
    let fx = Fixture::new();
    let file = fx.path("f");
    fs::write(&file, b"x").unwrap();
    fx.writer().record_installed_file(&file).unwrap();
    fs::set_permissions(&fx.config.backup_dir, fs::Permissions::from_mode(0o755)).unwrap();

    let err = fx.uninstaller().run().unwrap_err();

    assert!(err.is_tamper());
    assert!(file.exists());
}

#[test]
fn test_tampered_journal_best_effort() {
    let fx = Fixture::new();
    let file = fx.path("f");
    fs::write(&file, b"x").unwrap();
    fx.writer().record_installed_file(&file).unwrap();
    fs::set_permissions(fx.config.log_path(), fs::Permissions::from_mode(0o644)).unwrap();

    let config = Config {
        tamper_policy: TamperPolicy::BestEffort,
        ..fx.config.clone()
    };
    let report = Uninstaller::new(config).run().unwrap();

    assert!(report.tampered);
    assert!(report.best_effort());
    assert_eq!(report.removed, 1);
    assert!(!file.exists());
}

// =============================================================================
// Sanity Check Tests
// =============================================================================

#[test]
fn test_sanity_check_does_not_modify() {
    let fx = Fixture::new();
    let file = fx.path("f");
    fs::write(&file, b"x").unwrap();
    fx.writer().record_installed_file(&file).unwrap();

    let report = fx.uninstaller().sanity_check().unwrap();

    assert!(report.is_intact());
    assert!(file.exists());
    assert!(fx.config.log_path().exists());
}

#[test]
fn test_sanity_check_reports_damage() {
    let fx = Fixture::new();
    let file = fx.path("f");
    fs::write(&file, b"x").unwrap();
    fx.writer().record_installed_file(&file).unwrap();
    fs::remove_file(&file).unwrap();

    let report = fx.uninstaller().sanity_check().unwrap();

    assert_eq!(report.invalid_count(), 1);
    assert_eq!(report.diagnostics[0].path, file);
}
