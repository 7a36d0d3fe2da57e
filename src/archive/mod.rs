//! Zip-style container access for apk files.
//!
//! Reading goes through the `zip` crate; writing is done by [`WorkArchive`]
//! with hand-laid-out records because the output needs alignment padding,
//! raw (still-compressed) entry reuse and a signing hook, none of which the
//! stock writer offers.

mod writer;

pub use writer::{AlignmentRules, WorkArchive};

use crate::error::Error;
use crate::Result;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::read::ZipArchive;

/// A source apk opened read-only.
///
/// Keeps a name index so entries can be addressed both decompressed (for
/// digesting and manifest parsing) and raw (for pass-through links). The
/// handle must stay open until any [`WorkArchive`] borrowing it has been
/// finalized.
#[derive(Debug)]
pub struct SourceApk {
    path: PathBuf,
    archive: ZipArchive<File>,
    index: HashMap<String, usize>,
}

impl SourceApk {
    /// Opens `path` as a zip container. Fails with [`Error::NotAnArchive`]
    /// when the central directory is missing or corrupt.
    pub fn open(path: &Path) -> Result<Self> {
        let display = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)?;
        let mut archive =
            ZipArchive::new(file).map_err(|_| Error::NotAnArchive(display.clone()))?;
        let mut index = HashMap::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|_| Error::NotAnArchive(display.clone()))?;
            index.insert(entry.name().to_string(), i);
        }
        Ok(Self {
            path: path.to_path_buf(),
            archive,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entry names in central directory order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<(usize, &String)> =
            self.index.iter().map(|(n, i)| (*i, n)).collect();
        names.sort_by_key(|(i, _)| *i);
        names.into_iter().map(|(_, n)| n.clone()).collect()
    }

    /// Reads and decompresses one entry, `None` when absent.
    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(&i) = self.index.get(name) else {
            return Ok(None);
        };
        let mut entry = self.archive.by_index(i)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    pub(crate) fn entry_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn archive_mut(&mut self) -> &mut ZipArchive<File> {
        &mut self.archive
    }
}
