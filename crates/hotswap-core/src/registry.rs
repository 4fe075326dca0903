//! Module registry: loads archives into running modules and keeps track of
//! them.
//!
//! The registry provides:
//! - Loading from a file, a conventional folder, or a URL
//! - A per-module code loader map shared for cross-module symbol lookups
//! - The class cache of resolved symbols
//! - Enable/disable transitions
//!
//! Both the loader map and the loaded-module map are append-only. Modules
//! are never unloaded; a reload under the same name replaces the map entry
//! while already resolved symbols stay cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::RegistryConfig;
use crate::descriptor::{ModuleDescriptor, read_descriptor};
use crate::download::{Downloader, HttpDownloader};
use crate::error::{LoadError, Result};
use crate::host::HostContext;
use crate::index::SymbolIndex;
use crate::injection::HostInjector;
use crate::loader::ModuleCodeLoader;
use crate::module::{DynModule, Module, ModuleContext, PluginRef};
use crate::symbol::Symbol;
use crate::wasm::{WasmModule, check_contract};

/// Result of a URL load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The download was handed to the downloader; the module loads and
    /// enables when it completes.
    Started,
    /// The destination already existed or is already being downloaded.
    /// Nothing was fetched or loaded.
    Skipped,
}

/// Loads and tracks modules on behalf of one owning plugin.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    owner: PluginRef,
    host: Arc<HostContext>,
    config: RegistryConfig,
    index: Arc<SymbolIndex>,
    modules: DashMap<String, DynModule>,
    injector: HostInjector,
    downloader: Arc<dyn Downloader>,
}

/// Builder for [`ModuleRegistry`].
pub struct ModuleRegistryBuilder {
    owner: PluginRef,
    host: Arc<HostContext>,
    config: RegistryConfig,
    downloader: Option<Arc<dyn Downloader>>,
}

impl ModuleRegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`HttpDownloader`].
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn build(self) -> ModuleRegistry {
        let injector = HostInjector::new(self.host.loader_registry().cloned());
        let downloader = self
            .downloader
            .unwrap_or_else(|| Arc::new(HttpDownloader::default()));

        ModuleRegistry {
            inner: Arc::new(Inner {
                owner: self.owner,
                host: self.host,
                config: self.config,
                index: Arc::new(SymbolIndex::new()),
                modules: DashMap::new(),
                injector,
                downloader,
            }),
        }
    }
}

impl ModuleRegistry {
    /// Registry with the default configuration and downloader.
    pub fn new(owner: PluginRef, host: Arc<HostContext>) -> Self {
        Self::builder(owner, host).build()
    }

    pub fn builder(owner: PluginRef, host: Arc<HostContext>) -> ModuleRegistryBuilder {
        ModuleRegistryBuilder {
            owner,
            host,
            config: RegistryConfig::default(),
            downloader: None,
        }
    }

    pub fn owner(&self) -> &PluginRef {
        &self.inner.owner
    }

    pub fn host(&self) -> &Arc<HostContext> {
        &self.inner.host
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Shared loader map and class cache.
    pub fn index(&self) -> &Arc<SymbolIndex> {
        &self.inner.index
    }

    /// Load the module archive at `path`.
    ///
    /// Failures are logged at error level before being returned.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<DynModule> {
        let path = path.as_ref();
        match self.load(path) {
            Ok(module) => {
                tracing::info!(
                    "Loaded module {} from {}",
                    module.name(),
                    path.display()
                );
                Ok(module)
            }
            Err(e) => {
                tracing::error!("Failed to load module from {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Load `<data dir>/<modules dir>/<module_name>.<extension>`.
    pub fn load_with_default(&self, module_name: &str) -> Result<DynModule> {
        let folder = self.inner.config.modules_dir.clone();
        self.load_from_folder(folder, module_name)
    }

    /// Load `<data dir>/<folder>/<module_name>.<extension>`.
    pub fn load_from_folder(
        &self,
        folder: impl AsRef<Path>,
        module_name: &str,
    ) -> Result<DynModule> {
        self.load_from_file(self.archive_path(folder, module_name))
    }

    /// Download `<data dir>/<folder>/<module_name>.<extension>` from `url`,
    /// then load and enable it.
    pub fn load_from_url(
        &self,
        url: &str,
        folder: impl AsRef<Path>,
        module_name: &str,
    ) -> Result<DownloadOutcome> {
        self.load_from_url_to(url, self.archive_path(folder, module_name))
    }

    /// Download `url` to `destination`, then load and enable it.
    ///
    /// An existing destination, or one already being downloaded, is neither
    /// fetched again nor loaded. Fails with [`LoadError::Io`] when the
    /// download cannot be started.
    pub fn load_from_url_to(
        &self,
        url: &str,
        destination: impl AsRef<Path>,
    ) -> Result<DownloadOutcome> {
        let destination = destination.as_ref();
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let registry = self.clone();
        let on_success = Box::new(move |file: PathBuf| {
            if let Ok(module) = registry.load_from_file(&file) {
                Self::enable_module(module.as_ref());
            }
        });

        let started = self
            .inner
            .downloader
            .download(url, destination, on_success)
            .inspect_err(|e| {
                tracing::error!("Failed to start download of {}: {}", url, e);
            })?;

        if started {
            tracing::debug!("Downloading {} to {}", url, destination.display());
            Ok(DownloadOutcome::Started)
        } else {
            let file = destination
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| destination.display().to_string());
            tracing::info!("{} had already downloaded", file);
            Ok(DownloadOutcome::Skipped)
        }
    }

    /// Enable `module` unless it already is.
    pub fn enable_module(module: &dyn Module) {
        if !module.is_enabled() {
            module.set_enabled(true);
        }
    }

    /// Disable `module` unless it already is.
    pub fn disable_module(module: &dyn Module) {
        if module.is_enabled() {
            module.set_enabled(false);
        }
    }

    /// Resolve `name` through the class cache and every registered loader.
    pub fn resolve_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        self.inner.index.resolve_symbol(name)
    }

    /// Cache `symbol` under `name` unless a symbol is already cached.
    pub fn cache_symbol(&self, name: &str, symbol: Arc<Symbol>) -> Arc<Symbol> {
        self.inner.index.cache_symbol(name, symbol)
    }

    /// Live view of the loaded modules, keyed by self-reported name.
    pub fn loaded_modules(&self) -> &DashMap<String, DynModule> {
        &self.inner.modules
    }

    pub fn module(&self, name: &str) -> Option<DynModule> {
        self.inner.modules.get(name).map(|entry| entry.value().clone())
    }

    /// Code loader registered under a descriptor name.
    pub fn loader(&self, name: &str) -> Option<Arc<ModuleCodeLoader>> {
        self.inner.index.loader(name)
    }

    fn archive_path(&self, folder: impl AsRef<Path>, module_name: &str) -> PathBuf {
        self.inner
            .owner
            .data_path(folder)
            .join(self.inner.config.archive_file_name(module_name))
    }

    fn load(&self, path: &Path) -> Result<DynModule> {
        let inner = &self.inner;
        let descriptor = read_descriptor(path, &inner.config.descriptor_entries)?;
        self.warn_missing_dependencies(&descriptor);

        let loader = Arc::new(ModuleCodeLoader::new(
            descriptor.name.clone(),
            path,
            inner.host.engine().clone(),
            inner.host.scope().clone(),
            &inner.index,
        )?);
        inner.index.register_loader(&descriptor.name, loader.clone());
        inner.injector.inject(&descriptor.name, &loader);

        let entry = loader
            .load_symbol(&descriptor.main)
            .ok_or_else(|| LoadError::EntryPointNotFound {
                module: descriptor.name.clone(),
                entry: descriptor.main.clone(),
            })?;
        check_contract(&entry).map_err(|reason| LoadError::EntryPointInvalid {
            module: descriptor.name.clone(),
            entry: descriptor.main.clone(),
            reason,
        })?;

        let module: DynModule = Arc::new(
            WasmModule::instantiate(&loader, &descriptor.name, entry).map_err(|reason| {
                LoadError::InstantiationFailed {
                    module: descriptor.name.clone(),
                    reason,
                }
            })?,
        );

        let name = descriptor.name.clone();
        let context = ModuleContext {
            host: inner.host.clone(),
            descriptor,
            archive: path.to_path_buf(),
            owner: inner.owner.clone(),
        };
        module
            .init(context)
            .map_err(|e| LoadError::InitializationFailed {
                module: name,
                reason: e.to_string(),
            })?;

        if inner
            .modules
            .insert(module.name().to_string(), module.clone())
            .is_some()
        {
            tracing::debug!("Replaced loaded module {}", module.name());
        }
        Ok(module)
    }

    fn warn_missing_dependencies(&self, descriptor: &ModuleDescriptor) {
        for dependency in &descriptor.depend {
            if self.inner.index.loader(dependency).is_none() {
                tracing::warn!(
                    "Module {} depends on {}, which is not loaded yet",
                    descriptor.name,
                    dependency
                );
            }
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("owner", &self.inner.owner.name)
            .field("modules", &self.inner.modules.len())
            .field("loaders", &self.inner.index.loader_count())
            .finish_non_exhaustive()
    }
}
