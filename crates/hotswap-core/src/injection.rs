//! Publication of module loaders to the host.
//!
//! Hosts that want modules loaded by a registry to be resolvable from
//! outside it implement [`HostLoaderRegistry`]. The injector calls it for
//! every new loader and never lets a failure reach the load itself.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;

use crate::loader::ModuleCodeLoader;
use crate::symbol::{Symbol, SymbolScope};

/// Version of the [`HostLoaderRegistry`] contract implemented by this crate.
pub const LOADER_REGISTRY_API_VERSION: u32 = 1;

/// Why a loader could not be published to the host.
#[derive(Debug, thiserror::Error)]
pub enum InjectionError {
    #[error("host loader registry speaks API version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("host rejected the loader: {0}")]
    Rejected(String),

    #[error("host loader registry panicked: {0}")]
    Panicked(String),
}

/// Extension point through which the host accepts module loaders.
pub trait HostLoaderRegistry: Send + Sync {
    /// Contract version the host implements.
    fn api_version(&self) -> u32 {
        LOADER_REGISTRY_API_VERSION
    }

    /// Make `loader` resolvable under `name` on the host side.
    fn register_loader(
        &self,
        name: &str,
        loader: Arc<ModuleCodeLoader>,
    ) -> Result<(), InjectionError>;
}

/// Best-effort publisher used by the registry.
#[derive(Clone, Default)]
pub struct HostInjector {
    target: Option<Arc<dyn HostLoaderRegistry>>,
}

impl HostInjector {
    pub fn new(target: Option<Arc<dyn HostLoaderRegistry>>) -> Self {
        Self { target }
    }

    /// Publish `loader` under `name`. Returns whether the host accepted it.
    ///
    /// Failures are logged and swallowed.
    pub fn inject(&self, name: &str, loader: &Arc<ModuleCodeLoader>) -> bool {
        let Some(target) = &self.target else {
            tracing::debug!(
                "No host loader registry, module {} is only resolvable inside its registry",
                name
            );
            return false;
        };

        match Self::try_inject(target, name, loader) {
            Ok(()) => {
                tracing::debug!("Published code loader of module {} to the host", name);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "try to inject module {} into host loader registry failed: {}",
                    name,
                    e
                );
                tracing::warn!(
                    "modules loaded outside this registry may not be able to depend on {}",
                    name
                );
                false
            }
        }
    }

    fn try_inject(
        target: &Arc<dyn HostLoaderRegistry>,
        name: &str,
        loader: &Arc<ModuleCodeLoader>,
    ) -> Result<(), InjectionError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let found = target.api_version();
            if found != LOADER_REGISTRY_API_VERSION {
                return Err(InjectionError::VersionMismatch {
                    expected: LOADER_REGISTRY_API_VERSION,
                    found,
                });
            }
            target.register_loader(name, loader.clone())
        }));

        outcome.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(InjectionError::Panicked(message))
        })
    }
}

/// Host-side loader map.
///
/// Registries publish into it; anything holding it can resolve symbols
/// from every published module, for example another registry using it as a
/// fallback of its host scope.
#[derive(Default)]
pub struct SharedLoaderTable {
    loaders: DashMap<String, Arc<ModuleCodeLoader>>,
}

impl SharedLoaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleCodeLoader>> {
        self.loaders.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.loaders.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl HostLoaderRegistry for SharedLoaderTable {
    fn register_loader(
        &self,
        name: &str,
        loader: Arc<ModuleCodeLoader>,
    ) -> Result<(), InjectionError> {
        self.loaders.insert(name.to_string(), loader);
        Ok(())
    }
}

impl SymbolScope for SharedLoaderTable {
    fn find_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        let loaders: Vec<Arc<ModuleCodeLoader>> = self
            .loaders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        loaders.iter().find_map(|loader| loader.find_local(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SymbolIndex;
    use crate::symbol::HostScope;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use wasmtime::Engine;
    use zip::write::SimpleFileOptions;

    fn loader(dir: &Path) -> Arc<ModuleCodeLoader> {
        let path = dir.join("lib.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("lib/Shared.wat", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"(module)").unwrap();
        zip.finish().unwrap();

        let engine = Engine::default();
        let scope = Arc::new(HostScope::new(engine.clone()));
        let index = Arc::new(SymbolIndex::new());
        Arc::new(ModuleCodeLoader::new("lib", &path, engine, scope, &index).unwrap())
    }

    struct Outdated;

    impl HostLoaderRegistry for Outdated {
        fn api_version(&self) -> u32 {
            0
        }

        fn register_loader(&self, _: &str, _: Arc<ModuleCodeLoader>) -> Result<(), InjectionError> {
            panic!("must not be called on a version mismatch");
        }
    }

    struct Panicking;

    impl HostLoaderRegistry for Panicking {
        fn register_loader(&self, _: &str, _: Arc<ModuleCodeLoader>) -> Result<(), InjectionError> {
            panic!("internal map moved");
        }
    }

    #[test]
    fn test_inject_into_shared_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(SharedLoaderTable::new());
        let injector = HostInjector::new(Some(table.clone()));

        assert!(injector.inject("lib", &loader(dir.path())));
        assert_eq!(table.names(), vec!["lib"]);
        assert!(table.find_symbol("lib.Shared").is_some());
        assert!(table.find_symbol("lib.Missing").is_none());
    }

    #[test]
    fn test_without_target_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!HostInjector::default().inject("lib", &loader(dir.path())));
    }

    #[test]
    fn test_version_mismatch_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let injector = HostInjector::new(Some(Arc::new(Outdated)));
        assert!(!injector.inject("lib", &loader(dir.path())));
    }

    #[test]
    fn test_panicking_host_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let injector = HostInjector::new(Some(Arc::new(Panicking)));
        assert!(!injector.inject("lib", &loader(dir.path())));
    }
}
