//! WebAssembly-backed module instances.
//!
//! ## Entry point contract
//!
//! ```text
//! on_enable()            required, called when the module is enabled
//! on_disable()           required, called when the module is disabled
//! on_load()              optional, called once from init
//! name() -> (i32, i32)   optional, pointer and length of a UTF-8 name in `memory`
//! memory                 required by `name` and by `host.log`
//! ```
//!
//! ## Imports
//!
//! ```text
//! host.log(level: i32, ptr: i32, len: i32)   level 0 trace .. 4 error
//! <symbol>.<export>                          any export of another code unit
//! ```
//!
//! Imported code units are resolved through the module's code loader and
//! instantiated into the module's own store, each at most once.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use wasmtime::{Caller, Engine, Extern, ExternType, Instance, Linker, Store, Val, ValType};

use crate::error::ModuleError;
use crate::loader::ModuleCodeLoader;
use crate::module::{Module, ModuleBase, ModuleContext};
use crate::symbol::{HOST_NAMESPACE, Symbol};

pub const ON_ENABLE: &str = "on_enable";
pub const ON_DISABLE: &str = "on_disable";
pub const ON_LOAD: &str = "on_load";
pub const NAME_EXPORT: &str = "name";
pub const MEMORY_EXPORT: &str = "memory";

/// Store data of a module instance.
#[derive(Debug)]
pub struct ModuleState {
    module: String,
}

/// Check that `symbol` can serve as a module entry point.
pub fn check_contract(symbol: &Symbol) -> Result<(), String> {
    let module = symbol.module();
    let func = |name: &str| match module.get_export(name) {
        Some(ExternType::Func(ty)) => Ok(Some(ty)),
        Some(_) => Err(format!("export `{}` is not a function", name)),
        None => Ok(None),
    };

    let mut missing = Vec::new();
    for hook in [ON_ENABLE, ON_DISABLE, ON_LOAD] {
        match func(hook)? {
            Some(ty) if ty.params().len() != 0 || ty.results().len() != 0 => {
                return Err(format!("`{}` must take no parameters and return nothing", hook));
            }
            Some(_) => {}
            None if hook != ON_LOAD => missing.push(hook),
            None => {}
        }
    }
    if !missing.is_empty() {
        return Err(format!("missing exports: {}", missing.join(", ")));
    }

    if let Some(ty) = func(NAME_EXPORT)? {
        let results: Vec<ValType> = ty.results().collect();
        let returns_slice =
            results.len() == 2 && results.iter().all(|t| matches!(t, ValType::I32));
        if ty.params().len() != 0 || !returns_slice {
            return Err(format!("`{}` must have type () -> (i32, i32)", NAME_EXPORT));
        }
        if !matches!(module.get_export(MEMORY_EXPORT), Some(ExternType::Memory(_))) {
            return Err(format!("`{}` requires an exported `{}`", NAME_EXPORT, MEMORY_EXPORT));
        }
    }

    Ok(())
}

/// A module whose entry point is a WebAssembly code unit.
pub struct WasmModule {
    base: ModuleBase,
    name: String,
    entry: Arc<Symbol>,
    runtime: Mutex<Runtime>,
}

struct Runtime {
    store: Store<ModuleState>,
    instance: Instance,
}

impl WasmModule {
    /// Link and instantiate `entry` on behalf of module `module`.
    ///
    /// Fails with a description of the first link or start error.
    pub fn instantiate(
        loader: &ModuleCodeLoader,
        module: &str,
        entry: Arc<Symbol>,
    ) -> Result<Self, String> {
        let engine = entry.module().engine().clone();
        let linker = host_linker(&engine).map_err(|e| format!("{:#}", e))?;
        let store = Store::new(
            &engine,
            ModuleState {
                module: module.to_string(),
            },
        );

        let mut linking = Linking {
            loader,
            linker,
            store,
            linked: HashSet::new(),
            path: Vec::new(),
        };
        let instance = linking.link(&entry)?;
        let mut store = linking.store;

        let name = self_reported_name(&mut store, &instance)?.unwrap_or_else(|| module.to_string());

        Ok(Self {
            base: ModuleBase::new(),
            name,
            entry,
            runtime: Mutex::new(Runtime { store, instance }),
        })
    }

    /// Entry point symbol.
    pub fn entry(&self) -> &Arc<Symbol> {
        &self.entry
    }

    /// Context received from `init`.
    pub fn context(&self) -> Option<&ModuleContext> {
        self.base.context()
    }

    /// Call an exported function of the entry point.
    pub fn call(&self, function: &str, args: &[Val]) -> Result<Vec<Val>, ModuleError> {
        if self.base.context().is_none() {
            return Err(ModuleError::NotInitialized(self.name.clone()));
        }
        let mut runtime = self.runtime.lock();
        let Runtime { store, instance } = &mut *runtime;

        let func = instance
            .get_func(&mut *store, function)
            .ok_or_else(|| ModuleError::FunctionNotFound(function.to_string()))?;
        let mut results: Vec<Val> = func
            .ty(&*store)
            .results()
            .map(|ty| match ty {
                ValType::I64 => Val::I64(0),
                ValType::F32 => Val::F32(0),
                ValType::F64 => Val::F64(0),
                _ => Val::I32(0),
            })
            .collect();

        func.call(&mut *store, args, &mut results)
            .map_err(|e| ModuleError::Trap(format!("{}: {:#}", function, e)))?;
        Ok(results)
    }

    /// Run a `() -> ()` hook if the entry point exports it.
    fn run_hook(&self, hook: &str) -> Result<(), ModuleError> {
        let mut runtime = self.runtime.lock();
        let Runtime { store, instance } = &mut *runtime;

        if instance.get_export(&mut *store, hook).is_none() {
            return Ok(());
        }
        let func = instance
            .get_typed_func::<(), ()>(&mut *store, hook)
            .map_err(|e| ModuleError::Trap(format!("{}: {:#}", hook, e)))?;
        func.call(&mut *store, ())
            .map_err(|e| ModuleError::Trap(format!("{}: {:#}", hook, e)))
    }
}

impl Module for WasmModule {
    fn init(&self, context: ModuleContext) -> Result<(), ModuleError> {
        if !self.base.set_context(context) {
            tracing::warn!("Module {} initialized twice, keeping the first context", self.name);
            return Ok(());
        }
        self.run_hook(ON_LOAD)
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        if !self.base.transition(enabled) {
            return;
        }
        let hook = if enabled { ON_ENABLE } else { ON_DISABLE };
        match self.run_hook(hook) {
            Ok(()) => tracing::info!(
                "Module {} {}",
                self.name,
                if enabled { "enabled" } else { "disabled" }
            ),
            Err(e) => tracing::error!("Module {} failed in {}: {}", self.name, hook, e),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModule")
            .field("name", &self.name)
            .field("entry", &self.entry.name())
            .field("enabled", &self.base.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Depth-first linker for a code unit and everything it imports.
struct Linking<'a> {
    loader: &'a ModuleCodeLoader,
    linker: Linker<ModuleState>,
    store: Store<ModuleState>,
    linked: HashSet<String>,
    path: Vec<String>,
}

impl Linking<'_> {
    fn link(&mut self, symbol: &Symbol) -> Result<Instance, String> {
        if self.path.iter().any(|p| p == symbol.name()) {
            return Err(format!(
                "cyclic import: {} -> {}",
                self.path.join(" -> "),
                symbol.name()
            ));
        }
        self.path.push(symbol.name().to_string());

        for dependency in symbol.dependencies() {
            if self.linked.contains(&dependency) {
                continue;
            }
            let resolved = self.loader.load_symbol(&dependency).ok_or_else(|| {
                format!(
                    "unresolved import `{}` required by `{}`",
                    dependency,
                    symbol.name()
                )
            })?;
            let instance = self.link(&resolved)?;
            self.linker
                .instance(&mut self.store, &dependency, instance)
                .map_err(|e| format!("linking `{}`: {:#}", dependency, e))?;
            self.linked.insert(dependency);
        }

        let instance = self
            .linker
            .instantiate(&mut self.store, symbol.module())
            .map_err(|e| format!("`{}`: {:#}", symbol.name(), e))?;

        self.path.pop();
        Ok(instance)
    }
}

/// Linker with the host namespace defined.
fn host_linker(engine: &Engine) -> wasmtime::Result<Linker<ModuleState>> {
    let mut linker = Linker::new(engine);
    linker.func_wrap(
        HOST_NAMESPACE,
        "log",
        |mut caller: Caller<'_, ModuleState>, level: i32, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let memory = caller
                .get_export(MEMORY_EXPORT)
                .and_then(Extern::into_memory)
                .ok_or_else(|| wasmtime::Error::msg("host.log requires an exported memory"))?;
            let bytes = read_slice(memory.data(&caller), ptr, len)
                .ok_or_else(|| wasmtime::Error::msg("host.log message out of bounds"))?;
            let message = String::from_utf8_lossy(bytes);
            let module = &caller.data().module;

            match level {
                i32::MIN..=0 => tracing::trace!(module = %module, "{}", message),
                1 => tracing::debug!(module = %module, "{}", message),
                2 => tracing::info!(module = %module, "{}", message),
                3 => tracing::warn!(module = %module, "{}", message),
                _ => tracing::error!(module = %module, "{}", message),
            }
            Ok(())
        },
    )?;
    Ok(linker)
}

fn self_reported_name(
    store: &mut Store<ModuleState>,
    instance: &Instance,
) -> Result<Option<String>, String> {
    if instance.get_export(&mut *store, NAME_EXPORT).is_none() {
        return Ok(None);
    }

    let func = instance
        .get_typed_func::<(), (i32, i32)>(&mut *store, NAME_EXPORT)
        .map_err(|e| format!("{}: {:#}", NAME_EXPORT, e))?;
    let (ptr, len) = func
        .call(&mut *store, ())
        .map_err(|e| format!("{}: {:#}", NAME_EXPORT, e))?;
    let memory = instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or_else(|| format!("`{}` requires an exported `{}`", NAME_EXPORT, MEMORY_EXPORT))?;

    let bytes = read_slice(memory.data(&*store), ptr, len)
        .ok_or_else(|| format!("`{}` returned an out of bounds slice", NAME_EXPORT))?;
    let name = std::str::from_utf8(bytes)
        .map_err(|e| format!("`{}` is not UTF-8: {}", NAME_EXPORT, e))?
        .trim();

    Ok((!name.is_empty()).then(|| name.to_string()))
}

fn read_slice(data: &[u8], ptr: i32, len: i32) -> Option<&[u8]> {
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    data.get(start..end)
}
