//! Registry configuration.
//!
//! Defaults live in [`defaults`] so hosts and tests can refer to the same
//! values the registry uses when no configuration file is given.

use std::path::Path;

use serde::Deserialize;

/// Default values.
pub mod defaults {
    /// Folder under the owner's data directory holding module archives.
    pub const MODULES_DIR: &str = "modules";
    /// File extension of module archives.
    pub const ARCHIVE_EXTENSION: &str = "zip";
    /// Module-specific descriptor entry.
    pub const MODULE_DESCRIPTOR: &str = "module.toml";
    /// Generic descriptor entry, used when the module-specific one is absent.
    pub const PLUGIN_DESCRIPTOR: &str = "plugin.toml";
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings that shape how the registry finds and reads archives.
///
/// ```toml
/// modules_dir = "modules"
/// archive_extension = "zip"
/// descriptor_entries = ["module.toml", "plugin.toml"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Folder under the owner's data directory used by `load_with_default`.
    pub modules_dir: String,

    /// Extension appended to module names when building archive paths.
    pub archive_extension: String,

    /// Descriptor entries to look for, in order.
    pub descriptor_entries: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            modules_dir: defaults::MODULES_DIR.to_string(),
            archive_extension: defaults::ARCHIVE_EXTENSION.to_string(),
            descriptor_entries: vec![
                defaults::MODULE_DESCRIPTOR.to_string(),
                defaults::PLUGIN_DESCRIPTOR.to_string(),
            ],
        }
    }
}

impl RegistryConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// File name of the archive for `module_name`.
    pub fn archive_file_name(&self, module_name: &str) -> String {
        format!("{}.{}", module_name, self.archive_extension)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.descriptor_entries.is_empty() {
            return Err(ConfigError::Invalid(
                "descriptor_entries must name at least one entry".to_string(),
            ));
        }
        if self.archive_extension.is_empty() || self.archive_extension.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "archive_extension must be a bare extension, got {:?}",
                self.archive_extension
            )));
        }
        Ok(())
    }
}
