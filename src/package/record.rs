//! Package record definitions
//!
//! In-memory form of a precompiled package and the files embedded in it.

use std::fs;
use std::path::Path;

use bitflags::bitflags;

use crate::checksum::crc32;
use crate::error::{Result, StashError};

use super::FORMAT_VERSION;

/// What an embedded file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Precompiled kernel interface object, linked against the core object
    Interface,

    /// Fully linked kernel module
    Module,
}

impl FileKind {
    pub fn as_u32(self) -> u32 {
        match self {
            FileKind::Interface => 0,
            FileKind::Module => 1,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FileKind::Interface),
            1 => Some(FileKind::Module),
            _ => None,
        }
    }
}

bitflags! {
    /// Per-file attribute bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        /// `signature` holds a detached signature
        const DETACHED_SIGNATURE = 1 << 0;
        /// `linked_module_checksum` is meaningful
        const LINKED_MODULE_CHECKSUM = 1 << 1;
        /// The data carries its own signature
        const EMBEDDED_SIGNATURE = 1 << 2;
    }
}

/// One embedded artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub kind: FileKind,
    pub attributes: FileAttributes,
    pub name: String,
    /// Module produced when this interface is linked
    pub linked_module_name: String,
    /// Core object the interface links against (empty for modules)
    pub core_object_name: String,
    /// Install directory (empty for modules)
    pub target_directory: String,
    /// CRC-32 of `data` as recorded by the packer
    pub checksum: u32,
    pub data: Vec<u8>,
    /// CRC-32 of the separately built module this interface pairs with
    pub linked_module_checksum: u32,
    pub signature: Option<Vec<u8>>,
}

impl FileRecord {
    /// A kernel interface object
    pub fn interface(
        name: impl Into<String>,
        core_object_name: impl Into<String>,
        target_directory: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind: FileKind::Interface,
            attributes: FileAttributes::empty(),
            name: name.into(),
            linked_module_name: String::new(),
            core_object_name: core_object_name.into(),
            target_directory: target_directory.into(),
            checksum: crc32(&data),
            data,
            linked_module_checksum: 0,
            signature: None,
        }
    }

    /// A kernel module
    pub fn module(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: FileKind::Module,
            attributes: FileAttributes::empty(),
            name: name.into(),
            linked_module_name: String::new(),
            core_object_name: String::new(),
            target_directory: String::new(),
            checksum: crc32(&data),
            data,
            linked_module_checksum: 0,
            signature: None,
        }
    }

    /// Read an artifact from disk; the record is named after the file
    pub fn from_path(kind: FileKind, path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| StashError::file(path, e))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StashError::PackageCorruption(format!(
                    "{} has no UTF-8 file name",
                    path.display()
                ))
            })?
            .to_string();

        Ok(match kind {
            FileKind::Interface => Self::interface(name, "", "", data),
            FileKind::Module => Self::module(name, data),
        })
    }

    /// Pair this interface with a separately built module
    pub fn with_linked_module(mut self, name: impl Into<String>, checksum: u32) -> Self {
        self.linked_module_name = name.into();
        self.linked_module_checksum = checksum;
        self.attributes |= FileAttributes::LINKED_MODULE_CHECKSUM;
        self
    }

    /// Attach a detached signature
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self.attributes |= FileAttributes::DETACHED_SIGNATURE;
        self
    }

    /// Mark the data as carrying an embedded signature
    pub fn with_embedded_signature(mut self) -> Self {
        self.attributes |= FileAttributes::EMBEDDED_SIGNATURE;
        self
    }

    /// Whether `data` still matches the recorded checksum
    pub fn is_intact(&self) -> bool {
        crc32(&self.data) == self.checksum
    }

    /// The linked module checksum, when the attribute says it is set
    pub fn linked_module_checksum(&self) -> Option<u32> {
        self.attributes
            .contains(FileAttributes::LINKED_MODULE_CHECKSUM)
            .then_some(self.linked_module_checksum)
    }
}

/// One precompiled package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContainer {
    pub format_version: u32,
    /// Driver version the artifacts were built for
    pub version: String,
    pub description: String,
    /// Kernel version string the artifacts were built against
    pub target_kernel: String,
    pub files: Vec<FileRecord>,
}

impl PackageContainer {
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        target_kernel: impl Into<String>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            version: version.into(),
            description: description.into(),
            target_kernel: target_kernel.into(),
            files: Vec::new(),
        }
    }

    pub fn push_file(&mut self, file: FileRecord) {
        self.files.push(file);
    }

    /// Grow the package with more files
    pub fn append_files(&mut self, files: impl IntoIterator<Item = FileRecord>) {
        self.files.extend(files);
    }

    /// First embedded file with this name
    pub fn find_file(&self, name: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Names from `required` that are not in the package
    pub fn missing_files<'a, S: AsRef<str>>(&self, required: &'a [S]) -> Vec<&'a str> {
        required
            .iter()
            .map(|name: &'a S| AsRef::<str>::as_ref(name))
            .filter(|name| self.find_file(name).is_none())
            .collect()
    }

    /// Whether every name in `required` is present
    pub fn contains_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.missing_files(required).is_empty()
    }
}
