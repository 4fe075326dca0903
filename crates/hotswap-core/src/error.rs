//! Error types for module loading and module calls.

use std::path::PathBuf;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Reasons a module load can fail.
///
/// Every variant names the archive or module it concerns so that a logged
/// error is enough to diagnose the failure without further context.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The archive does not exist or is not a readable zip file.
    #[error("Archive not readable: {}: {reason}", path.display())]
    ArchiveUnreadable { path: PathBuf, reason: String },

    /// Neither the module-specific nor the generic descriptor entry exists.
    #[error("{}: module descriptor not found (looked for {})", archive.display(), searched.join(", "))]
    DescriptorMissing {
        archive: PathBuf,
        searched: Vec<String>,
    },

    /// The descriptor entry exists but cannot be parsed.
    #[error("{}: invalid module descriptor: {reason}", archive.display())]
    DescriptorInvalid { archive: PathBuf, reason: String },

    /// The isolated code loader could not be built for the archive.
    #[error("{module}: code loader construction failed: {reason}")]
    LoaderConstructionFailed { module: String, reason: String },

    /// The entry point symbol is not defined anywhere reachable.
    #[error("{module}: entry point `{entry}` not found")]
    EntryPointNotFound { module: String, entry: String },

    /// The entry point exists but does not satisfy the module contract.
    #[error("{module}: entry point `{entry}` is not a module: {reason}")]
    EntryPointInvalid {
        module: String,
        entry: String,
        reason: String,
    },

    /// Linking or instantiating the entry point failed.
    #[error("{module}: instantiation failed: {reason}")]
    InstantiationFailed { module: String, reason: String },

    /// The module's load hook failed during `init`.
    #[error("{module}: initialization failed: {reason}")]
    InitializationFailed { module: String, reason: String },

    /// Filesystem error outside of archive reading.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by calls into a running module.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The module has no export with the requested name.
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    /// Execution trapped or the call was rejected by the runtime.
    #[error("Module trapped: {0}")]
    Trap(String),

    /// The module was used before `init` ran.
    #[error("Module not initialized: {0}")]
    NotInitialized(String),
}
