//! Module archive access.
//!
//! An archive is a zip file. Code unit `a.b.C` lives in the entry
//! `a/b/C.wasm` (binary or text format) or `a/b/C.wat`.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{LoadError, Result};

/// Extensions recognised as code units, in lookup order.
pub const CODE_UNIT_EXTENSIONS: [&str; 2] = ["wasm", "wat"];

/// Upper bound on the buffer reserved up front for one entry. The size in
/// the zip header is untrusted; larger entries grow while reading.
const MAX_ENTRY_PREALLOCATION: u64 = 1 << 20;

/// An archive read fully into memory.
#[derive(Debug)]
pub struct ModuleArchive {
    path: PathBuf,
    entries: HashMap<String, Vec<u8>>,
}

impl ModuleArchive {
    /// Read every file entry of the archive at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut zip = open_zip(path)?;
        let unreadable = |reason: String| LoadError::ArchiveUnreadable {
            path: path.to_path_buf(),
            reason,
        };

        let mut entries = HashMap::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|e| unreadable(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = normalize_entry_name(entry.name());
            let mut data = Vec::with_capacity(entry_capacity(entry.size()));
            entry
                .read_to_end(&mut data)
                .map_err(|e| unreadable(format!("{}: {}", name, e)))?;
            entries.insert(name, data);
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Path of the archive on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes of an entry.
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Bytes of the code unit defining `symbol`, if this archive has one.
    pub fn code_unit(&self, symbol: &str) -> Option<&[u8]> {
        let stem = symbol.replace('.', "/");
        CODE_UNIT_EXTENSIONS
            .iter()
            .find_map(|ext| self.entry(&format!("{}.{}", stem, ext)))
    }

    /// Symbol names of every code unit in the archive, sorted.
    pub fn symbol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .filter_map(|name| {
                let (stem, ext) = name.rsplit_once('.')?;
                CODE_UNIT_EXTENSIONS
                    .contains(&ext)
                    .then(|| stem.replace('/', "."))
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Read the first descriptor entry present in the archive.
///
/// Returns the entry name with its text, or `None` when none of `candidates`
/// exist. Only the descriptor entry is decompressed.
pub fn read_descriptor_entry(
    path: &Path,
    candidates: &[String],
) -> Result<Option<(String, String)>> {
    let mut zip = open_zip(path)?;

    for candidate in candidates {
        let mut entry = match zip.by_name(candidate) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => {
                return Err(LoadError::ArchiveUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| LoadError::DescriptorInvalid {
                archive: path.to_path_buf(),
                reason: format!("{}: {}", candidate, e),
            })?;
        return Ok(Some((candidate.clone(), text)));
    }

    Ok(None)
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path).map_err(|e| LoadError::ArchiveUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    zip::ZipArchive::new(file).map_err(|e| LoadError::ArchiveUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn normalize_entry_name(name: &str) -> String {
    name.trim_start_matches("./").trim_start_matches('/').to_string()
}

fn entry_capacity(declared: u64) -> usize {
    declared.min(MAX_ENTRY_PREALLOCATION) as usize
}
