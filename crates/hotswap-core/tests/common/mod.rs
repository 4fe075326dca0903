//! Shared fixtures: archives built on the fly from WAT sources.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotswap_core::{DynModule, HostContext, Module, ModuleRegistry, PluginRef, WasmModule};
use zip::write::SimpleFileOptions;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn host() -> Arc<HostContext> {
    Arc::new(HostContext::new("test-host", semver::Version::new(1, 0, 0)))
}

pub fn registry(data_dir: &Path) -> ModuleRegistry {
    ModuleRegistry::new(PluginRef::new("owner", data_dir), host())
}

/// Write a zip archive with the given `(entry, text)` pairs.
pub fn write_archive(path: &Path, entries: &[(&str, &str)]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

pub fn descriptor(name: &str, main: &str) -> String {
    format!("name = \"{}\"\nmain = \"{}\"\nversion = \"1.0.0\"\n", name, main)
}

/// Entry point satisfying the module contract. It counts its hook calls
/// and exposes the counters as `loads`, `enables` and `disables`.
///
/// `imports` are placed after the host import, `body` at the end.
pub fn entry_wat(reported_name: Option<&str>, imports: &str, body: &str) -> String {
    let name = reported_name
        .map(|n| {
            format!(
                r#"(data (i32.const 64) "{}")
  (func (export "name") (result i32 i32) i32.const 64 i32.const {})"#,
                n,
                n.len()
            )
        })
        .unwrap_or_default();

    format!(
        r#"(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  {imports}
  (memory (export "memory") 1)
  (data (i32.const 0) "enabled")
  (data (i32.const 16) "disabled")
  (global $loads (mut i32) (i32.const 0))
  (global $enables (mut i32) (i32.const 0))
  (global $disables (mut i32) (i32.const 0))
  (func (export "on_load")
    global.get $loads
    i32.const 1
    i32.add
    global.set $loads)
  (func (export "on_enable")
    global.get $enables
    i32.const 1
    i32.add
    global.set $enables
    i32.const 2
    i32.const 0
    i32.const 7
    call $log)
  (func (export "on_disable")
    global.get $disables
    i32.const 1
    i32.add
    global.set $disables
    i32.const 2
    i32.const 16
    i32.const 8
    call $log)
  (func (export "loads") (result i32) global.get $loads)
  (func (export "enables") (result i32) global.get $enables)
  (func (export "disables") (result i32) global.get $disables)
  {name}
  {body})"#
    )
}

/// Archive `<dir>/<module>.zip` whose entry point `<module>.Main` reports
/// `reported_name`.
pub fn simple_module(dir: &Path, module: &str, reported_name: Option<&str>) -> PathBuf {
    let descriptor = descriptor(module, &format!("{}.Main", module));
    let entry = format!("{}/Main.wat", module);
    let code = entry_wat(reported_name, "", "");
    write_archive(
        &dir.join(format!("{}.zip", module)),
        &[
            ("module.toml", descriptor.as_str()),
            (entry.as_str(), code.as_str()),
        ],
    )
}

/// Library code unit exporting `value() -> i32`.
pub fn value_unit(value: i32) -> String {
    format!(
        r#"(module (func (export "value") (result i32) i32.const {}))"#,
        value
    )
}

/// Call an `() -> i32` export of a loaded WebAssembly module.
pub fn call_i32(module: &DynModule, export: &str) -> i32 {
    let wasm = module
        .as_any()
        .downcast_ref::<WasmModule>()
        .expect("module is backed by WebAssembly");
    wasm.call(export, &[]).unwrap()[0].unwrap_i32()
}
