//! Cross-module resolution tests
//!
//! Entry points importing code units from other modules, from the host
//! scope, and from modules of another registry; host injection failures.

mod common;

use std::sync::Arc;

use common::*;
use hotswap_core::{
    HostContext, HostLoaderRegistry, InjectionError, LoadError, Module, ModuleCodeLoader,
    ModuleRegistry, PluginRef, SharedLoaderTable, SymbolOrigin,
};

const VALUE_IMPORT: &str = r#"(import "lib.Util" "value" (func $value (result i32)))"#;
const ANSWER: &str = r#"(func (export "answer") (result i32) call $value)"#;

/// Module `lib` whose archive also carries `lib.Util`.
fn library(dir: &std::path::Path, value: i32) -> std::path::PathBuf {
    let code = entry_wat(None, "", "");
    let util = value_unit(value);
    write_archive(
        &dir.join("lib.zip"),
        &[
            ("module.toml", "name = \"lib\"\nmain = \"lib.Main\""),
            ("lib/Main.wat", code.as_str()),
            ("lib/Util.wat", util.as_str()),
        ],
    )
}

/// Module `app` whose entry point imports `lib.Util`.
fn consumer(dir: &std::path::Path) -> std::path::PathBuf {
    let code = entry_wat(Some("App"), VALUE_IMPORT, ANSWER);
    write_archive(
        &dir.join("app.zip"),
        &[
            ("module.toml", "name = \"app\"\nmain = \"app.Main\"\ndepend = [\"lib\"]"),
            ("app/Main.wat", code.as_str()),
        ],
    )
}

#[test]
fn test_resolve_symbol_before_and_after_load() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    assert!(registry.resolve_symbol("lib.Util").is_none());

    registry.load_from_file(library(dir.path(), 7)).unwrap();

    let first = registry.resolve_symbol("lib.Util").unwrap();
    let second = registry.resolve_symbol("lib.Util").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.origin(), &SymbolOrigin::Module("lib".into()));
}

#[test]
fn test_cache_symbol_keeps_first_writer() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load_from_file(library(dir.path(), 7)).unwrap();

    let resolved = registry.resolve_symbol("lib.Util").unwrap();
    let other = registry.resolve_symbol("lib.Main").unwrap();
    let kept = registry.cache_symbol("lib.Util", other);
    assert!(Arc::ptr_eq(&kept, &resolved));
}

#[test]
fn test_entry_point_imports_other_module() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let registry = registry(dir.path());
    registry.load_from_file(library(dir.path(), 42))?;

    let app = registry.load_from_file(consumer(dir.path()))?;

    assert_eq!(app.name(), "App");
    assert_eq!(call_i32(&app, "answer"), 42);
    Ok(())
}

#[test]
fn test_import_before_dependency_is_loaded_fails() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());

    let err = registry.load_from_file(consumer(dir.path())).err().unwrap();
    assert!(matches!(err, LoadError::InstantiationFailed { .. }));

    registry.load_from_file(library(dir.path(), 1)).unwrap();
    let app = registry.load_from_file(consumer(dir.path())).unwrap();
    assert_eq!(call_i32(&app, "answer"), 1);
}

#[test]
fn test_entry_point_imports_host_unit() {
    let dir = tempfile::tempdir().unwrap();
    let host = host();
    host.scope().define("lib.Util", value_unit(5).as_bytes()).unwrap();
    let registry = ModuleRegistry::new(PluginRef::new("owner", dir.path()), host);

    let app = registry.load_from_file(consumer(dir.path())).unwrap();
    assert_eq!(call_i32(&app, "answer"), 5);
}

#[test]
fn test_modules_shared_between_registries() {
    let dir = tempfile::tempdir().unwrap();
    let table = Arc::new(SharedLoaderTable::new());

    let publishing = Arc::new(
        HostContext::new("host-a", semver::Version::new(1, 0, 0))
            .with_loader_registry(table.clone()),
    );
    let first = ModuleRegistry::new(PluginRef::new("first", dir.path()), publishing.clone());
    first.load_from_file(library(dir.path(), 9)).unwrap();
    assert_eq!(table.names(), vec!["lib"]);

    let consuming = Arc::new(HostContext::with_engine(
        "host-b",
        semver::Version::new(1, 0, 0),
        publishing.engine().clone(),
    ));
    consuming.scope().add_fallback(table.clone());
    let second = ModuleRegistry::new(PluginRef::new("second", dir.path()), consuming);

    let app = second.load_from_file(consumer(dir.path())).unwrap();
    assert_eq!(call_i32(&app, "answer"), 9);
    assert!(second.loader("lib").is_none());
}

#[test]
fn test_cyclic_imports_fail_instantiation() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let main = entry_wat(None, r#"(import "loop.A" "f" (func (result i32)))"#, "");
    let path = write_archive(
        &dir.path().join("loop.zip"),
        &[
            ("module.toml", "name = \"loop\"\nmain = \"loop.Main\""),
            ("loop/Main.wat", main.as_str()),
            (
                "loop/A.wat",
                r#"(module
                    (import "loop.B" "g" (func $g (result i32)))
                    (func (export "f") (result i32) call $g))"#,
            ),
            (
                "loop/B.wat",
                r#"(module
                    (import "loop.A" "f" (func $f (result i32)))
                    (func (export "g") (result i32) call $f))"#,
            ),
        ],
    );

    let err = registry.load_from_file(path).err().unwrap();
    match err {
        LoadError::InstantiationFailed { reason, .. } => assert!(reason.contains("cyclic")),
        other => panic!("Expected InstantiationFailed, got {}", other),
    }
}

struct Rejecting;

impl HostLoaderRegistry for Rejecting {
    fn register_loader(&self, name: &str, _: Arc<ModuleCodeLoader>) -> Result<(), InjectionError> {
        Err(InjectionError::Rejected(format!("{} is not welcome", name)))
    }
}

struct Panicking;

impl HostLoaderRegistry for Panicking {
    fn register_loader(&self, _: &str, _: Arc<ModuleCodeLoader>) -> Result<(), InjectionError> {
        panic!("host loader map is gone");
    }
}

struct NewerApi;

impl HostLoaderRegistry for NewerApi {
    fn api_version(&self) -> u32 {
        hotswap_core::LOADER_REGISTRY_API_VERSION + 1
    }

    fn register_loader(&self, _: &str, _: Arc<ModuleCodeLoader>) -> Result<(), InjectionError> {
        Ok(())
    }
}

#[test]
fn test_injection_failures_never_fail_a_load() {
    init_tracing();
    let hosts: Vec<Arc<dyn HostLoaderRegistry>> =
        vec![Arc::new(Rejecting), Arc::new(Panicking), Arc::new(NewerApi)];

    for target in hosts {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(
            HostContext::new("test-host", semver::Version::new(1, 0, 0))
                .with_loader_registry(target),
        );
        let registry = ModuleRegistry::new(PluginRef::new("owner", dir.path()), host);

        let module = registry
            .load_from_file(simple_module(dir.path(), "sturdy", None))
            .unwrap();
        assert_eq!(module.name(), "sturdy");
        assert!(registry.loader("sturdy").is_some());
    }
}

/// Module `name` carrying its own `shared.Value` and importing it.
fn self_contained(dir: &std::path::Path, name: &str, value: i32) -> std::path::PathBuf {
    let code = entry_wat(
        None,
        r#"(import "shared.Value" "value" (func $value (result i32)))"#,
        ANSWER,
    );
    let unit = value_unit(value);
    let descriptor = format!("name = \"{}\"\nmain = \"{}.Main\"", name, name);
    let entry = format!("{}/Main.wat", name);
    write_archive(
        &dir.join(format!("{}.zip", name)),
        &[
            ("module.toml", descriptor.as_str()),
            (entry.as_str(), code.as_str()),
            ("shared/Value.wat", unit.as_str()),
        ],
    )
}

#[test]
fn test_same_symbol_in_two_modules_links_each_own_copy() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());

    let left = registry.load_from_file(self_contained(dir.path(), "left", 1)).unwrap();
    let right = registry.load_from_file(self_contained(dir.path(), "right", 2)).unwrap();

    assert_eq!(call_i32(&left, "answer"), 1);
    assert_eq!(call_i32(&right, "answer"), 2);
    let cached = registry.resolve_symbol("shared.Value").unwrap();
    assert_eq!(cached.origin(), &SymbolOrigin::Module("left".into()));
}
