//! Runtime module loading for hosts that extend themselves without a
//! restart.
//!
//! A module is a zip archive holding a TOML descriptor and WebAssembly code
//! units. [`ModuleRegistry`] turns an archive into a running, lifecycle
//! managed [`Module`]:
//!
//! ```text
//! archive ─► descriptor ─► ModuleCodeLoader ─► host injection
//!                                 │
//!                                 ▼
//!          entry point ─► contract check ─► instantiate ─► init ─► loaded map
//! ```
//!
//! Each archive gets its own [`ModuleCodeLoader`]. It resolves symbols from
//! its own archive first, then from the other modules of the registry, then
//! from the host scope, so modules can import code units of each other.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotswap_core::{HostContext, ModuleRegistry, PluginRef};
//!
//! let host = Arc::new(HostContext::new("my-host", semver::Version::new(1, 0, 0)));
//! let registry = ModuleRegistry::new(PluginRef::new("my-plugin", "data"), host);
//!
//! if let Ok(module) = registry.load_with_default("ranking") {
//!     ModuleRegistry::enable_module(module.as_ref());
//! }
//! ```

pub mod archive;
pub mod config;
pub mod descriptor;
pub mod download;
pub mod error;
pub mod host;
pub mod index;
pub mod injection;
pub mod loader;
pub mod module;
pub mod registry;
pub mod symbol;
pub mod wasm;

pub use config::{ConfigError, RegistryConfig};
pub use descriptor::ModuleDescriptor;
pub use download::{DownloadCallback, DownloadConfig, Downloader, HttpDownloader};
pub use error::{LoadError, ModuleError, Result};
pub use host::HostContext;
pub use index::SymbolIndex;
pub use injection::{
    HostInjector, HostLoaderRegistry, InjectionError, LOADER_REGISTRY_API_VERSION,
    SharedLoaderTable,
};
pub use loader::ModuleCodeLoader;
pub use module::{DynModule, Module, ModuleBase, ModuleContext, PluginRef};
pub use registry::{DownloadOutcome, ModuleRegistry, ModuleRegistryBuilder};
pub use symbol::{HOST_NAMESPACE, HostScope, Symbol, SymbolOrigin, SymbolScope};
pub use wasm::WasmModule;

/// Re-exported so hosts can build engines and call values without a direct
/// dependency.
pub use wasmtime;
