//! Shared symbol index: the per-module loader map and the class cache.
//!
//! Loaders hold a weak handle to the index so that a module can resolve
//! symbols defined by other modules loaded into the same registry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::loader::ModuleCodeLoader;
use crate::symbol::Symbol;

/// Loader map plus memoized symbol resolutions.
#[derive(Default)]
pub struct SymbolIndex {
    loaders: DashMap<String, Arc<ModuleCodeLoader>>,
    classes: DashMap<String, Arc<Symbol>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` under `name`, returning the loader it replaced.
    pub fn register_loader(
        &self,
        name: &str,
        loader: Arc<ModuleCodeLoader>,
    ) -> Option<Arc<ModuleCodeLoader>> {
        let previous = self.loaders.insert(name.to_string(), loader);
        if previous.is_some() {
            tracing::debug!("Replaced code loader for module {}", name);
        }
        previous
    }

    /// Loader registered under `name`.
    pub fn loader(&self, name: &str) -> Option<Arc<ModuleCodeLoader>> {
        self.loaders.get(name).map(|entry| entry.value().clone())
    }

    /// Names of all registered loaders, unordered.
    pub fn loader_names(&self) -> Vec<String> {
        self.loaders.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered loaders.
    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Resolve `name` against the cache, then against every registered
    /// loader's own archive. The first loader that defines it wins; the
    /// iteration order is unspecified.
    pub fn resolve_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        if let Some(cached) = self.cached(name) {
            return Some(cached);
        }

        // Snapshot so no shard lock is held while a unit compiles.
        let loaders: Vec<Arc<ModuleCodeLoader>> = self
            .loaders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let found = loaders.iter().find_map(|loader| loader.find_local(name))?;
        Some(self.cache_symbol(name, found))
    }

    /// Memoize `symbol` under `name` unless something is already cached.
    /// Returns the cached symbol, which is `symbol` only for the first writer.
    pub fn cache_symbol(&self, name: &str, symbol: Arc<Symbol>) -> Arc<Symbol> {
        self.classes
            .entry(name.to_string())
            .or_insert(symbol)
            .value()
            .clone()
    }

    /// Cached resolution for `name`, if any.
    pub fn cached(&self, name: &str) -> Option<Arc<Symbol>> {
        self.classes.get(name).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolOrigin;
    use wasmtime::Engine;

    fn symbol(engine: &Engine, name: &str) -> Arc<Symbol> {
        Arc::new(Symbol::compile(engine, name, SymbolOrigin::Host, b"(module)").unwrap())
    }

    #[test]
    fn test_cache_first_writer_wins() {
        let engine = Engine::default();
        let index = SymbolIndex::new();
        let first = symbol(&engine, "a.B");
        let second = symbol(&engine, "a.B");

        let kept = index.cache_symbol("a.B", first.clone());
        assert!(Arc::ptr_eq(&kept, &first));

        let kept = index.cache_symbol("a.B", second.clone());
        assert!(Arc::ptr_eq(&kept, &first));
        assert!(Arc::ptr_eq(&index.cached("a.B").unwrap(), &first));
    }

    #[test]
    fn test_resolve_uses_cache_without_loaders() {
        let engine = Engine::default();
        let index = SymbolIndex::new();
        assert!(index.resolve_symbol("a.B").is_none());

        let sym = symbol(&engine, "a.B");
        index.cache_symbol("a.B", sym.clone());
        assert!(Arc::ptr_eq(&index.resolve_symbol("a.B").unwrap(), &sym));
    }
}
