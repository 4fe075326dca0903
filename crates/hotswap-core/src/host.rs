//! Host environment handed to the registry and to every module.
//!
//! The host is passed explicitly; there is no process-wide accessor.

use std::fmt;
use std::sync::Arc;

use wasmtime::Engine;

use crate::injection::HostLoaderRegistry;
use crate::symbol::HostScope;

/// The embedding application as seen by the loader.
pub struct HostContext {
    name: String,
    version: semver::Version,
    engine: Engine,
    scope: Arc<HostScope>,
    loader_registry: Option<Arc<dyn HostLoaderRegistry>>,
}

impl HostContext {
    /// Create a host context with a default engine and an empty host scope.
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self::with_engine(name, version, Engine::default())
    }

    /// Create a host context compiling with `engine`.
    ///
    /// Every registry sharing symbols must share the engine.
    pub fn with_engine(name: impl Into<String>, version: semver::Version, engine: Engine) -> Self {
        let scope = Arc::new(HostScope::new(engine.clone()));
        Self {
            name: name.into(),
            version,
            engine,
            scope,
            loader_registry: None,
        }
    }

    /// Publish module loaders to `registry` as they are created.
    pub fn with_loader_registry(mut self, registry: Arc<dyn HostLoaderRegistry>) -> Self {
        self.loader_registry = Some(registry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Parent scope of every module code loader.
    pub fn scope(&self) -> &Arc<HostScope> {
        &self.scope
    }

    /// Host loader map extension point, when the host offers one.
    pub fn loader_registry(&self) -> Option<&Arc<dyn HostLoaderRegistry>> {
        self.loader_registry.as_ref()
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("loader_registry", &self.loader_registry.is_some())
            .finish_non_exhaustive()
    }
}
