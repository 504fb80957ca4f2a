//! Journal Reader
//!
//! Loads the whole journal into memory. A journal is either parsed
//! completely or rejected; a partial entry list is never returned.

use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, StashError};

use super::entry::{
    EntryKind, LogEntry, Ownership, BACKED_UP_SYMLINK, FIRST_BACKUP_SLOT, INSTALLED_FILE,
    INSTALLED_SYMLINK,
};

/// A fully loaded journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    /// Driver version string (first header line)
    pub version: String,

    /// Human-readable driver name (second header line)
    pub description: String,

    /// Records in the order they were appended
    pub entries: Vec<LogEntry>,
}

impl Journal {
    /// Load the journal after checking the backup directory and log
    /// permissions. Changed permissions yield `StashError::Tampered`.
    pub fn load(config: &Config) -> Result<Self> {
        let log_path = config.log_path();
        ensure_exists(&log_path)?;

        check_permissions(config)?;
        Self::read(&log_path)
    }

    /// Load the journal without the permission check
    ///
    /// Only for callers that have already warned the operator about a
    /// tamper signal and chose to continue.
    pub fn load_unchecked(config: &Config) -> Result<Self> {
        let log_path = config.log_path();
        ensure_exists(&log_path)?;
        Self::read(&log_path)
    }

    fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| StashError::file(path, e))?;
        let journal = Self::parse(&bytes)?;
        debug!(
            path = %path.display(),
            entries = journal.entries.len(),
            "loaded journal"
        );
        Ok(journal)
    }

    /// Parse journal text
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut lines = LineCursor::new(bytes)?;

        let (line, version) = lines.next_line("version header")?;
        let version = utf8(line, version, "version header")?;
        let (line, description) = lines.next_line("description header")?;
        let description = utf8(line, description, "description header")?;

        let mut entries: Vec<LogEntry> = Vec::new();
        let mut last_slot = None;
        while !lines.is_done() {
            let line = lines.next_number();
            let entry = parse_record(&mut lines)?;
            if let Some(slot) = entry.slot() {
                // slots address the backup store 1:1
                if let Some(prev) = last_slot.filter(|&prev| slot <= prev) {
                    return Err(corrupt(
                        line,
                        &format!("backup slot {} not above previous {}", slot, prev),
                    ));
                }
                last_slot = Some(slot);
            }
            entries.push(entry);
        }

        Ok(Self {
            version,
            description,
            entries,
        })
    }

    /// Highest backup slot referenced by the journal
    pub fn max_slot(&self) -> Option<u32> {
        self.entries.iter().filter_map(LogEntry::slot).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `NoJournal` when nothing is at `path`; any other failure keeps the OS error
fn ensure_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StashError::NoJournal(path.to_path_buf()))
        }
        Err(e) => Err(StashError::file(path, e)),
    }
}

/// Version and description of the currently installed driver
///
/// Reads only the two header lines. Returns `None` when no journal exists.
pub fn installed_driver_info(config: &Config) -> Result<Option<(String, String)>> {
    let log_path = config.log_path();
    let file = match fs::File::open(&log_path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StashError::file(log_path, e)),
    };

    let mut reader = BufReader::new(file);
    let mut header = [String::new(), String::new()];
    for (i, field) in header.iter_mut().enumerate() {
        reader
            .read_line(field)
            .map_err(|e| StashError::file(&log_path, e))?;
        if !field.ends_with('\n') {
            return Err(StashError::JournalCorruption {
                line: i + 1,
                reason: "truncated header".to_string(),
            });
        }
        field.pop();
    }

    let [version, description] = header;
    Ok(Some((version, description)))
}

/// Compare the backup directory and journal permission bits against the
/// configured owner-only masks
pub fn check_permissions(config: &Config) -> Result<()> {
    let log_path = config.log_path();
    let checks: [(&Path, u32); 2] = [
        (config.backup_dir.as_path(), config.dir_mode),
        (log_path.as_path(), config.log_mode),
    ];

    for (path, expected) in checks {
        let meta = fs::symlink_metadata(path).map_err(|e| StashError::file(path, e))?;
        let found = meta.permissions().mode() & 0o7777;
        if found != expected {
            warn!(
                path = %path.display(),
                expected = %format!("{:o}", expected),
                found = %format!("{:o}", found),
                "journal permissions changed"
            );
            return Err(StashError::Tampered {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }
    }

    Ok(())
}

// =============================================================================
// Record Parsing
// =============================================================================

/// Forward-only cursor over newline-terminated lines
struct LineCursor<'a> {
    lines: Vec<&'a [u8]>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
        // split leaves the text after the last newline as the final element
        match lines.pop() {
            Some([]) | None => {}
            Some(_) => {
                return Err(StashError::JournalCorruption {
                    line: lines.len() + 1,
                    reason: "unterminated final line".to_string(),
                })
            }
        }
        Ok(Self { lines, pos: 0 })
    }

    /// 1-based number of the line `next_line` returns next
    fn next_number(&self) -> usize {
        self.pos + 1
    }

    fn is_done(&self) -> bool {
        self.pos >= self.lines.len()
    }

    /// Next line and its 1-based number
    fn next_line(&mut self, what: &str) -> Result<(usize, &'a [u8])> {
        match self.lines.get(self.pos) {
            Some(&line) => {
                self.pos += 1;
                Ok((self.pos, line))
            }
            None => Err(StashError::JournalCorruption {
                line: self.pos + 1,
                reason: format!("missing {}", what),
            }),
        }
    }
}

fn parse_record(lines: &mut LineCursor<'_>) -> Result<LogEntry> {
    let (line, head) = lines.next_line("record")?;

    let sep = head
        .windows(2)
        .position(|w| w == b": ")
        .ok_or_else(|| corrupt(line, "record line lacks '<id>: <path>'"))?;
    let id = parse_decimal(line, &head[..sep], "record id")?;
    let path = &head[sep + 2..];
    if path.is_empty() {
        return Err(corrupt(line, "empty path"));
    }
    let path = os_path(path);

    let kind = match id {
        INSTALLED_FILE => {
            let (line, crc) = lines.next_line("checksum")?;
            EntryKind::InstalledFile {
                checksum: parse_decimal(line, crc, "checksum")?,
            }
        }
        INSTALLED_SYMLINK => {
            let (line, target) = lines.next_line("symlink target")?;
            EntryKind::InstalledSymlink {
                target: non_empty_path(line, target)?,
            }
        }
        BACKED_UP_SYMLINK => {
            let (line, target) = lines.next_line("symlink target")?;
            let target = non_empty_path(line, target)?;
            let (line, fields) = lines.next_line("permissions")?;
            let fields = split_fields::<3>(line, fields)?;
            EntryKind::BackedUpSymlink {
                target,
                ownership: parse_ownership(line, &fields)?,
            }
        }
        slot if slot >= FIRST_BACKUP_SLOT => {
            let (line, fields) = lines.next_line("checksum and permissions")?;
            let fields = split_fields::<4>(line, fields)?;
            EntryKind::BackedUpFile {
                slot,
                checksum: parse_decimal(line, fields[0], "checksum")?,
                ownership: parse_ownership(line, &fields[1..])?,
            }
        }
        other => return Err(corrupt(line, &format!("unknown record id {}", other))),
    };

    Ok(LogEntry::new(kind, path))
}

fn parse_ownership(line: usize, fields: &[&[u8]]) -> Result<Ownership> {
    let mode = std::str::from_utf8(fields[0])
        .ok()
        .and_then(|s| u32::from_str_radix(s, 8).ok())
        .filter(|m| m & !0o7777 == 0)
        .ok_or_else(|| corrupt(line, "malformed octal mode"))?;

    Ok(Ownership {
        mode,
        uid: parse_decimal(line, fields[1], "uid")?,
        gid: parse_decimal(line, fields[2], "gid")?,
    })
}

fn split_fields<'a, const N: usize>(line: usize, text: &'a [u8]) -> Result<[&'a [u8]; N]> {
    let fields: Vec<&[u8]> = text.split(|&b| b == b' ').collect();
    fields
        .try_into()
        .map_err(|_| corrupt(line, &format!("expected {} space-separated fields", N)))
}

fn parse_decimal(line: usize, text: &[u8], what: &str) -> Result<u32> {
    if text.is_empty() || !text.iter().all(u8::is_ascii_digit) {
        return Err(corrupt(line, &format!("non-numeric {}", what)));
    }
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| corrupt(line, &format!("{} out of range", what)))
}

fn non_empty_path(line: usize, bytes: &[u8]) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(corrupt(line, "empty symlink target"));
    }
    Ok(os_path(bytes))
}

fn os_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(bytes))
}

fn utf8(line: usize, bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| corrupt(line, &format!("{} is not UTF-8", what)))
}

fn corrupt(line: usize, reason: &str) -> StashError {
    StashError::JournalCorruption {
        line,
        reason: reason.to_string(),
    }
}
