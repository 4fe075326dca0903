//! Translation tables for module messages.
//!
//! Tables are read from a `.properties` file (`key=value`, `#`/`!` comments)
//! or from TOML, where nested tables flatten to dotted keys. Lookups are
//! memoized; `%1`..`%n` placeholders are filled from parameters.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use dashmap::DashMap;

/// Returned for keys the table does not define.
pub const MISSING_TRANSLATION: &str = "Language reading error!";

#[derive(Debug, thiserror::Error)]
pub enum LanguageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A loaded translation table.
#[derive(Debug, Default)]
pub struct Language {
    entries: HashMap<String, String>,
    cache: DashMap<String, String>,
}

impl Language {
    /// Load `path`; files ending in `.toml` are read as TOML, anything else
    /// as properties.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LanguageError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let language = if is_toml {
            Self::from_toml_str(&text)?
        } else {
            Self::from_properties_str(&text)
        };
        tracing::debug!(
            "Loaded {} translations from {}",
            language.len(),
            path.display()
        );
        Ok(language)
    }

    pub fn from_properties_str(text: &str) -> Self {
        Self::from_entries(parse_properties(text))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, LanguageError> {
        let table: toml::Table = text.parse()?;
        let mut entries = HashMap::new();
        flatten("", &table, &mut entries);
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self {
            entries,
            cache: DashMap::new(),
        }
    }

    /// Number of keys in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Translation of `key`, or [`MISSING_TRANSLATION`].
    pub fn translate(&self, key: &str) -> String {
        self.cache
            .entry(key.to_string())
            .or_insert_with(|| match self.entries.get(key) {
                Some(value) => value.clone(),
                None => {
                    tracing::warn!("Missing translation for {}", key);
                    MISSING_TRANSLATION.to_string()
                }
            })
            .value()
            .clone()
    }

    /// Translation of `key` with `%1`..`%n` replaced by `params`.
    pub fn translate_with(&self, key: &str, params: &[&dyn Display]) -> String {
        let mut text = self.translate(key);
        // Highest index first so `%1` never eats the prefix of `%10`.
        for (index, param) in params.iter().enumerate().rev() {
            text = text.replace(&format!("%{}", index + 1), &param.to_string());
        }
        text
    }
}

fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let mut logical = line.trim_start().to_string();
        if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
            continue;
        }
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let split = logical.find(['=', ':']);
        let (key, value) = match split {
            Some(at) => (&logical[..at], &logical[at + 1..]),
            None => (logical.as_str(), ""),
        };
        entries.insert(unescape(key.trim_end()), unescape(value.trim_start()));
    }

    entries
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(nested) => flatten(&key, nested, out),
            toml::Value::String(s) => {
                out.insert(key, s.clone());
            }
            toml::Value::Array(items) => {
                let lines: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                out.insert(key, lines.join("\n"));
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}
