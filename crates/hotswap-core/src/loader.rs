//! Isolated per-module code loader.
//!
//! Each loaded archive gets its own loader. Lookups prefer the archive's own
//! code units, then other loaded modules through the shared index, then the
//! parent scope.

use std::path::Path;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use wasmtime::Engine;

use crate::archive::ModuleArchive;
use crate::error::{LoadError, Result};
use crate::index::SymbolIndex;
use crate::symbol::{Symbol, SymbolOrigin, SymbolScope};

/// Code loader scoped to a single module archive.
pub struct ModuleCodeLoader {
    module: String,
    archive: ModuleArchive,
    engine: Engine,
    parent: Arc<dyn SymbolScope>,
    index: Weak<SymbolIndex>,
    compiled: DashMap<String, Arc<Symbol>>,
}

impl ModuleCodeLoader {
    /// Build a loader for the archive at `path`.
    ///
    /// The archive's entries are read eagerly; code units compile lazily on
    /// first lookup.
    pub fn new(
        module: impl Into<String>,
        path: &Path,
        engine: Engine,
        parent: Arc<dyn SymbolScope>,
        index: &Arc<SymbolIndex>,
    ) -> Result<Self> {
        let module = module.into();
        let archive = ModuleArchive::open(path).map_err(|e| LoadError::LoaderConstructionFailed {
            module: module.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            module,
            archive,
            engine,
            parent,
            index: Arc::downgrade(index),
            compiled: DashMap::new(),
        })
    }

    /// Name of the module this loader serves.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Path of the archive.
    pub fn archive_path(&self) -> &Path {
        self.archive.path()
    }

    /// Every symbol the archive defines.
    pub fn symbol_names(&self) -> Vec<String> {
        self.archive.symbol_names()
    }

    /// Whether the archive itself defines `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.archive.code_unit(name).is_some()
    }

    /// Resolve `name` from this archive only.
    ///
    /// A unit that is present but does not compile is reported and treated
    /// as a miss.
    pub fn find_local(&self, name: &str) -> Option<Arc<Symbol>> {
        if let Some(symbol) = self.compiled.get(name) {
            return Some(symbol.value().clone());
        }

        let bytes = self.archive.code_unit(name)?;
        match Symbol::compile(
            &self.engine,
            name,
            SymbolOrigin::Module(self.module.clone()),
            bytes,
        ) {
            Ok(symbol) => Some(
                self.compiled
                    .entry(name.to_string())
                    .or_insert(Arc::new(symbol))
                    .value()
                    .clone(),
            ),
            Err(e) => {
                tracing::warn!(
                    "Module {}: code unit {} failed to compile: {:#}",
                    self.module,
                    name,
                    e
                );
                None
            }
        }
    }

    /// Resolve `name` for this module: own archive, other modules, parent.
    ///
    /// A local definition always wins, even when another module's unit of
    /// the same name is already in the class cache.
    pub fn load_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        let index = self.index.upgrade();

        if let Some(symbol) = self.find_local(name) {
            if let Some(index) = &index {
                index.cache_symbol(name, symbol.clone());
            }
            return Some(symbol);
        }

        if let Some(symbol) = index.as_ref().and_then(|index| index.resolve_symbol(name)) {
            return Some(symbol);
        }

        self.parent.find_symbol(name)
    }
}

impl SymbolScope for ModuleCodeLoader {
    fn find_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        self.find_local(name)
    }
}

impl std::fmt::Debug for ModuleCodeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCodeLoader")
            .field("module", &self.module)
            .field("archive", &self.archive.path())
            .finish_non_exhaustive()
    }
}
