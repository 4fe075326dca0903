//! Module descriptor parsing.
//!
//! A descriptor is a small TOML document stored in the archive:
//!
//! ```toml
//! name = "ranking"
//! main = "ranking.RankingModule"
//! version = "1.2.0"
//! description = "Leaderboards"
//! authors = ["lt_name"]
//! depend = ["storage"]
//! ```
//!
//! `main` is required. `name` falls back to the archive's file stem.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive;
use crate::error::{LoadError, Result};

/// Parsed module metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module name.
    pub name: String,

    /// Fully qualified entry point symbol.
    pub main: String,

    /// Module version, free-form.
    pub version: Option<String>,

    /// Human readable description.
    pub description: Option<String>,

    /// Module authors.
    pub authors: Vec<String>,

    /// Modules expected to be loaded before this one.
    pub depend: Vec<String>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    main: Option<String>,
    version: Option<toml::Value>,
    description: Option<String>,
    author: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    depend: Vec<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor with only the required fields.
    pub fn new(name: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            main: main.into(),
            version: None,
            description: None,
            authors: Vec::new(),
            depend: Vec::new(),
        }
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, module: impl Into<String>) -> Self {
        self.depend.push(module.into());
        self
    }

    /// Parse descriptor text. `fallback_name` is used when `name` is absent.
    pub fn parse(text: &str, fallback_name: &str) -> std::result::Result<Self, String> {
        let raw: RawDescriptor = toml::from_str(text).map_err(|e| e.to_string())?;

        let main = raw
            .main
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| "missing required key `main`".to_string())?;

        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        if name.is_empty() {
            return Err("module name is empty".to_string());
        }

        // Versions like `1.0` parse as floats in TOML
        let version = raw.version.map(|v| match v {
            toml::Value::String(s) => s,
            other => other.to_string(),
        });

        let mut authors = raw.authors;
        if let Some(author) = raw.author {
            authors.insert(0, author);
        }

        Ok(Self {
            name,
            main,
            version,
            description: raw.description,
            authors,
            depend: raw.depend,
        })
    }
}

/// Read and parse the descriptor of the archive at `path`.
///
/// `entries` are tried in order; the first present entry wins.
pub fn read_descriptor(path: &Path, entries: &[String]) -> Result<ModuleDescriptor> {
    let (entry, text) =
        archive::read_descriptor_entry(path, entries)?.ok_or_else(|| {
            LoadError::DescriptorMissing {
                archive: path.to_path_buf(),
                searched: entries.to_vec(),
            }
        })?;

    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    ModuleDescriptor::parse(&text, fallback).map_err(|reason| LoadError::DescriptorInvalid {
        archive: path.to_path_buf(),
        reason: format!("{}: {}", entry, reason),
    })
}
