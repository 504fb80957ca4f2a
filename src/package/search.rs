//! Package files on disk
//!
//! Reading and writing package files, searching a directory of candidates
//! for one that fits the running system, and extracting embedded files.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checksum::crc32;
use crate::error::{Result, StashError};

use super::builder::pack;
use super::reader::{unpack, Applicability, Expectation};
use super::record::PackageContainer;

/// A package accepted by `find_package`
#[derive(Debug, Clone)]
pub struct FoundPackage {
    pub path: PathBuf,
    pub container: PackageContainer,
}

/// Read and unpack one package file
pub fn read_package(path: &Path, expect: &Expectation) -> Result<Applicability> {
    let bytes = fs::read(path).map_err(|e| StashError::file(path, e))?;
    unpack(&bytes, expect)
}

/// Pack `container` and write it to `path`
pub fn write_package(path: &Path, container: &PackageContainer) -> Result<()> {
    let bytes = pack(container)?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| StashError::file(path, e))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| StashError::file(path, e))?;

    info!(path = %path.display(), bytes = bytes.len(), "wrote package");
    Ok(())
}

/// Search `dir` for the first package (in file name order) that is built for
/// the expected versions and contains every name in `required`
///
/// Candidates that are corrupt, not applicable, or incomplete are skipped.
pub fn find_package<S: AsRef<str>>(
    dir: &Path,
    expect: &Expectation,
    required: &[S],
) -> Result<Option<FoundPackage>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StashError::file(dir, e))? {
        let entry = entry.map_err(|e| StashError::file(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();

    for path in candidates {
        match read_package(&path, expect) {
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable package");
            }
            Ok(Applicability::NotApplicable(reason)) => {
                debug!(path = %path.display(), %reason, "skipping package");
            }
            Ok(Applicability::Applicable(container)) => {
                let missing = container.missing_files(required);
                if !missing.is_empty() {
                    warn!(
                        path = %path.display(),
                        missing = ?missing,
                        "skipping package lacking required files"
                    );
                    continue;
                }
                info!(path = %path.display(), "found matching package");
                return Ok(Some(FoundPackage { path, container }));
            }
        }
    }

    Ok(None)
}

/// Write one embedded file to `dest`, refusing corrupt data
pub fn extract_file(container: &PackageContainer, name: &str, dest: &Path) -> Result<()> {
    let file = container
        .find_file(name)
        .ok_or_else(|| StashError::FileNotInPackage(name.to_string()))?;

    let actual = crc32(&file.data);
    if actual != file.checksum {
        return Err(StashError::ChecksumMismatch {
            name: name.to_string(),
            expected: file.checksum,
            found: actual,
        });
    }

    fs::write(dest, &file.data).map_err(|e| StashError::file(dest, e))?;
    debug!(file = name, dest = %dest.display(), "extracted");
    Ok(())
}
