//! Tests for the journal writer

use std::fs;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use driverstash::config::{Config, JournalSync};
use driverstash::journal::{EntryKind, Journal, JournalWriter, LogEntry, Ownership, FIRST_BACKUP_SLOT};
use driverstash::{crc32, StashError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, Config) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .backup_dir(temp_dir.path().join("backup"))
        .journal_sync(JournalSync::OnClose)
        .build();
    (temp_dir, config)
}

fn root_path(temp: &TempDir, name: &str) -> PathBuf {
    let root = temp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    root.join(name)
}

fn log_text(config: &Config) -> String {
    fs::read_to_string(config.log_path()).unwrap()
}

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

// =============================================================================
// Creation Tests
// =============================================================================

#[test]
fn test_create_writes_header() {
    let (_temp, config) = setup();

    JournalWriter::create(&config, "550.54", "Example Driver").unwrap();

    assert_eq!(log_text(&config), "550.54\nExample Driver\n");
}

#[test]
fn test_create_sets_owner_only_permissions() {
    let (_temp, config) = setup();

    JournalWriter::create(&config, "1.0", "d").unwrap();

    assert_eq!(mode_of(&config.backup_dir), 0o700);
    assert_eq!(mode_of(&config.log_path()), 0o600);
}

#[test]
fn test_create_truncates_previous_journal() {
    let (temp, config) = setup();
    let file = root_path(&temp, "lib.so");
    fs::write(&file, b"x").unwrap();

    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    writer.record_installed_file(&file).unwrap();
    JournalWriter::create(&config, "2.0", "d").unwrap();

    assert_eq!(log_text(&config), "2.0\nd\n");
}

#[test]
fn test_create_rejects_newline_in_header() {
    let (_temp, config) = setup();

    let result = JournalWriter::create(&config, "1.0\n2: /etc/passwd", "d");

    assert!(matches!(result, Err(StashError::Unrepresentable(_))));
}

#[test]
fn test_create_rejects_invalid_config() {
    let (_temp, config) = setup();
    let config = Config {
        dir_mode: 0o755,
        ..config
    };

    let result = JournalWriter::create(&config, "1.0", "d");

    assert!(matches!(result, Err(StashError::Config(_))));
}

// =============================================================================
// Record Layout Tests
// =============================================================================

#[test]
fn test_append_entry_layouts() {
    let (_temp, config) = setup();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    let owner = Ownership {
        mode: 0o644,
        uid: 0,
        gid: 27,
    };

    writer
        .append_entry(&LogEntry::installed_file("/usr/lib/libfoo.so.1", 12345))
        .unwrap();
    writer
        .append_entry(&LogEntry::installed_symlink("/usr/lib/libfoo.so", "libfoo.so.1"))
        .unwrap();
    writer
        .append_entry(&LogEntry::backed_up_symlink("/usr/lib/libgl.so", "libgl.so.9", owner))
        .unwrap();
    writer
        .append_entry(&LogEntry::backed_up_file(100, "/usr/lib/libgl.so.9", 42, owner))
        .unwrap();

    assert_eq!(
        log_text(&config),
        "1.0\nd\n\
         1: /usr/lib/libfoo.so.1\n12345\n\
         2: /usr/lib/libfoo.so\nlibfoo.so.1\n\
         3: /usr/lib/libgl.so\nlibgl.so.9\n644 0 27\n\
         100: /usr/lib/libgl.so.9\n42 644 0 27\n"
    );
}

#[test]
fn test_append_rejects_newline_in_path() {
    let (_temp, config) = setup();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let result = writer.append_entry(&LogEntry::installed_file("/tmp/a\nb", 1));

    assert!(matches!(result, Err(StashError::Unrepresentable(_))));
    assert_eq!(log_text(&config), "1.0\nd\n");
}

#[test]
fn test_append_rejects_slot_below_base() {
    let (_temp, config) = setup();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    let owner = Ownership {
        mode: 0o644,
        uid: 0,
        gid: 0,
    };

    let result = writer.append_entry(&LogEntry::backed_up_file(3, "/a", 1, owner));

    assert!(matches!(result, Err(StashError::Unrepresentable(_))));
}

#[test]
fn test_append_after_journal_removed_fails() {
    let (_temp, config) = setup();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    fs::remove_file(config.log_path()).unwrap();

    let result = writer.append_entry(&LogEntry::installed_file("/a", 1));

    assert!(matches!(result, Err(StashError::File { .. })));
}

#[test]
fn test_every_record_sync_appends() {
    let (_temp, config) = setup();
    let config = Config {
        journal_sync: JournalSync::EveryRecord,
        ..config
    };
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    writer
        .append_entry(&LogEntry::installed_symlink("/a", "b"))
        .unwrap();

    assert_eq!(log_text(&config), "1.0\nd\n2: /a\nb\n");
}

// =============================================================================
// Install Session Tests
// =============================================================================

#[test]
fn test_record_installed_file_checksums_content() {
    let (temp, config) = setup();
    let file = root_path(&temp, "module.ko");
    fs::write(&file, b"module bytes").unwrap();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let entry = writer.record_installed_file(&file).unwrap();

    assert_eq!(entry.checksum(), Some(crc32(b"module bytes")));
    let journal = Journal::load(&config).unwrap();
    assert_eq!(journal.entries, vec![entry]);
}

#[test]
fn test_record_installed_file_missing_fails() {
    let (temp, config) = setup();
    let writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let result = writer.record_installed_file(&root_path(&temp, "absent"));

    assert!(matches!(result, Err(StashError::File { .. })));
}

#[test]
fn test_backup_nothing_there() {
    let (temp, config) = setup();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let entry = writer.backup(&root_path(&temp, "absent")).unwrap();

    assert!(entry.is_none());
    assert_eq!(writer.next_slot(), FIRST_BACKUP_SLOT);
    assert_eq!(log_text(&config), "1.0\nd\n");
}

#[test]
fn test_backup_regular_file_moves_into_store() {
    let (temp, config) = setup();
    let file = root_path(&temp, "libGL.so.1");
    fs::write(&file, b"old library").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o640)).unwrap();
    let meta = fs::metadata(&file).unwrap();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let entry = writer.backup(&file).unwrap().unwrap();

    assert_eq!(
        entry.kind,
        EntryKind::BackedUpFile {
            slot: 100,
            checksum: crc32(b"old library"),
            ownership: Ownership {
                mode: 0o640,
                uid: meta.uid(),
                gid: meta.gid(),
            },
        }
    );
    assert!(!file.exists());
    assert_eq!(fs::read(writer.stash_path(100)).unwrap(), b"old library");
    assert_eq!(writer.next_slot(), 101);
}

#[test]
fn test_backup_symlink_records_target() {
    let (temp, config) = setup();
    let link = root_path(&temp, "libGL.so");
    symlink("libGL.so.1", &link).unwrap();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let entry = writer.backup(&link).unwrap().unwrap();

    assert!(matches!(entry.kind, EntryKind::BackedUpSymlink { .. }));
    assert_eq!(entry.target(), Some(Path::new("libGL.so.1")));
    assert!(fs::symlink_metadata(&link).is_err());
    // symlinks never consume a slot
    assert_eq!(writer.next_slot(), FIRST_BACKUP_SLOT);
}

#[test]
fn test_backup_directory_is_refused() {
    let (temp, config) = setup();
    let dir = root_path(&temp, "subdir");
    fs::create_dir(&dir).unwrap();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let result = writer.backup(&dir);

    assert!(matches!(result, Err(StashError::Unrepresentable(_))));
    assert!(dir.is_dir());
}

// =============================================================================
// Slot Allocation Tests
// =============================================================================

#[test]
fn test_slots_strictly_increasing() {
    let (temp, config) = setup();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();

    let mut slots = Vec::new();
    for i in 0..5 {
        let file = root_path(&temp, &format!("f{}", i));
        fs::write(&file, format!("content {}", i)).unwrap();
        slots.push(writer.backup(&file).unwrap().unwrap().slot().unwrap());
    }

    assert_eq!(slots, vec![100, 101, 102, 103, 104]);
    for slot in slots {
        assert!(writer.stash_path(slot).is_file());
    }
}

#[test]
fn test_slots_skip_existing_store_files() {
    let (temp, config) = setup();
    fs::create_dir_all(&config.backup_dir).unwrap();
    fs::write(config.backup_dir.join("150"), b"stale").unwrap();
    let file = root_path(&temp, "f");
    fs::write(&file, b"new").unwrap();

    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    let entry = writer.backup(&file).unwrap().unwrap();

    assert_eq!(entry.slot(), Some(151));
    assert_eq!(fs::read(config.backup_dir.join("150")).unwrap(), b"stale");
}

#[test]
fn test_open_continues_slot_sequence() {
    let (temp, config) = setup();
    let mut writer = JournalWriter::create(&config, "1.0", "d").unwrap();
    for name in ["a", "b"] {
        let file = root_path(&temp, name);
        fs::write(&file, name).unwrap();
        writer.backup(&file).unwrap();
    }
    drop(writer);

    let mut resumed = JournalWriter::open(&config).unwrap();
    assert_eq!(resumed.next_slot(), 102);

    let file = root_path(&temp, "c");
    fs::write(&file, b"c").unwrap();
    assert_eq!(resumed.backup(&file).unwrap().unwrap().slot(), Some(102));

    let journal = Journal::load(&config).unwrap();
    assert_eq!(journal.max_slot(), Some(102));
}

#[test]
fn test_independent_sessions_have_independent_counters() {
    let temp = TempDir::new().unwrap();
    let config_a = Config::builder().backup_dir(temp.path().join("a")).build();
    let config_b = Config::builder().backup_dir(temp.path().join("b")).build();
    let mut a = JournalWriter::create(&config_a, "1.0", "a").unwrap();
    let b = JournalWriter::create(&config_b, "1.0", "b").unwrap();

    let file = temp.path().join("f");
    fs::write(&file, b"x").unwrap();
    a.backup(&file).unwrap();

    assert_eq!(a.next_slot(), 101);
    assert_eq!(b.next_slot(), 100);
}
