//! Symbols and symbol scopes.
//!
//! A symbol is one compiled code unit. Scopes answer "who defines `name`"
//! and are chained: a module's own archive, the other loaded modules, then
//! the host.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use wasmtime::{Engine, ExternType};

/// Import namespace served by host functions rather than by a symbol.
pub const HOST_NAMESPACE: &str = "host";

/// Where a symbol was defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolOrigin {
    /// Defined in the archive of the named module.
    Module(String),
    /// Provided by the host environment.
    Host,
}

impl fmt::Display for SymbolOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolOrigin::Module(name) => write!(f, "module `{}`", name),
            SymbolOrigin::Host => f.write_str("host"),
        }
    }
}

/// A compiled code unit.
pub struct Symbol {
    name: String,
    origin: SymbolOrigin,
    module: wasmtime::Module,
}

impl Symbol {
    /// Compile `bytes` (binary or text format) into a symbol.
    pub fn compile(
        engine: &Engine,
        name: impl Into<String>,
        origin: SymbolOrigin,
        bytes: &[u8],
    ) -> wasmtime::Result<Self> {
        let module = wasmtime::Module::new(engine, bytes)?;
        Ok(Self {
            name: name.into(),
            origin,
            module,
        })
    }

    /// Fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining scope.
    pub fn origin(&self) -> &SymbolOrigin {
        &self.origin
    }

    /// The compiled module.
    pub fn module(&self) -> &wasmtime::Module {
        &self.module
    }

    /// Names of the exported functions.
    pub fn exported_functions(&self) -> Vec<String> {
        self.module
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Symbols this unit imports from, in first-use order, without the host
    /// namespace.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        for import in self.module.imports() {
            let namespace = import.module();
            if namespace != HOST_NAMESPACE && !deps.iter().any(|d| d == namespace) {
                deps.push(namespace.to_string());
            }
        }
        deps
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Something that can resolve symbol names.
///
/// A miss is a normal outcome and returns `None`.
pub trait SymbolScope: Send + Sync {
    fn find_symbol(&self, name: &str) -> Option<Arc<Symbol>>;
}

/// The host's own scope: code units the host ships, plus optional fallback
/// scopes consulted in insertion order.
///
/// This is the parent of every module code loader.
pub struct HostScope {
    engine: Engine,
    units: DashMap<String, Arc<Symbol>>,
    fallbacks: RwLock<Vec<Arc<dyn SymbolScope>>>,
}

impl HostScope {
    /// Create an empty scope compiling with `engine`.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            units: DashMap::new(),
            fallbacks: RwLock::new(Vec::new()),
        }
    }

    /// Compile and define a host code unit. Redefining a name replaces it.
    pub fn define(&self, name: &str, bytes: &[u8]) -> wasmtime::Result<Arc<Symbol>> {
        let symbol = Arc::new(Symbol::compile(
            &self.engine,
            name,
            SymbolOrigin::Host,
            bytes,
        )?);
        self.units.insert(name.to_string(), symbol.clone());
        tracing::debug!("Defined host symbol {}", name);
        Ok(symbol)
    }

    /// Consult `scope` after the host's own units.
    pub fn add_fallback(&self, scope: Arc<dyn SymbolScope>) {
        self.fallbacks.write().push(scope);
    }

    /// Whether the host itself defines `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }
}

impl SymbolScope for HostScope {
    fn find_symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        if let Some(symbol) = self.units.get(name) {
            return Some(symbol.clone());
        }
        let fallbacks = self.fallbacks.read().clone();
        fallbacks.iter().find_map(|scope| scope.find_symbol(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDER: &str = r#"(module
        (import "host" "log" (func (param i32 i32 i32)))
        (import "lib.Base" "value" (func (result i32)))
        (import "lib.Base" "other" (func (result i32)))
        (func (export "add") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add))"#;

    #[test]
    fn test_symbol_reports_exports_and_dependencies() {
        let engine = Engine::default();
        let symbol = Symbol::compile(&engine, "lib.Adder", SymbolOrigin::Host, ADDER.as_bytes())
            .unwrap();

        assert_eq!(symbol.name(), "lib.Adder");
        assert_eq!(symbol.exported_functions(), vec!["add"]);
        assert_eq!(symbol.dependencies(), vec!["lib.Base"]);
    }

    #[test]
    fn test_host_scope_define_and_find() {
        let scope = HostScope::new(Engine::default());
        assert!(scope.find_symbol("host.Util").is_none());

        let defined = scope.define("host.Util", b"(module)").unwrap();
        let found = scope.find_symbol("host.Util").unwrap();
        assert!(Arc::ptr_eq(&defined, &found));
        assert_eq!(found.origin(), &SymbolOrigin::Host);
    }

    #[test]
    fn test_host_scope_consults_fallbacks() {
        let engine = Engine::default();
        let inner = Arc::new(HostScope::new(engine.clone()));
        inner.define("shared.Lib", b"(module)").unwrap();

        let outer = HostScope::new(engine);
        outer.add_fallback(inner);
        assert!(outer.find_symbol("shared.Lib").is_some());
        assert!(!outer.defines("shared.Lib"));
    }

    #[test]
    fn test_invalid_code_fails_to_compile() {
        let scope = HostScope::new(Engine::default());
        assert!(scope.define("broken", b"(module (func (export \"f\") i32.add))").is_err());
    }
}
