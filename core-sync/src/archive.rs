//! Package archive reader
//!
//! Entries are listed without decompressing them; only the entries the caller
//! asks for are inflated, one at a time, so at most one document is held in
//! memory besides the compressed package itself.

use bytes::Bytes;
use core_library::{normalize_entry_name, CanonicalPath};
use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::error::{Result, SyncError};

/// Upper bound on the buffer reserved from an entry's declared size. The
/// header is untrusted; larger entries grow the buffer as they are read.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

fn capacity_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOCATION) as usize
}

/// A named file inside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub index: usize,
    pub name: String,
    /// `None` for directories and names that normalize to nothing
    pub path: Option<CanonicalPath>,
}

pub struct PackageArchive {
    url: String,
    archive: ZipArchive<Cursor<Bytes>>,
}

impl PackageArchive {
    /// Opens a downloaded package.
    ///
    /// # Errors
    ///
    /// [`SyncError::ExtractionFailed`] when the bytes are not a readable zip.
    pub fn open(url: impl Into<String>, body: Bytes) -> Result<Self> {
        let url = url.into();
        let archive =
            ZipArchive::new(Cursor::new(body)).map_err(|e| SyncError::ExtractionFailed {
                url: url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { url, archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Entry metadata in archive order, without inflating any data.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| SyncError::ExtractionFailed {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;
            let name = file.name().to_string();
            let path = if file.is_dir() {
                None
            } else {
                normalize_entry_name(&name)
            };
            entries.push(ArchiveEntry { index, name, path });
        }
        Ok(entries)
    }

    /// Inflates one entry.
    pub fn read(&mut self, entry: &ArchiveEntry) -> Result<Bytes> {
        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| SyncError::ExtractionFailed {
                url: self.url.clone(),
                message: format!("{}: {}", entry.name, e),
            })?;
        let mut data = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut data)
            .map_err(|e| SyncError::ExtractionFailed {
                url: self.url.clone(),
                message: format!("{}: {}", entry.name, e),
            })?;
        Ok(Bytes::from(data))
    }
}
