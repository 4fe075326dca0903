//! The lifecycle contract every loaded module implements.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::descriptor::ModuleDescriptor;
use crate::error::ModuleError;
use crate::host::HostContext;

/// Reference to the plugin that owns a registry and its modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRef {
    /// Plugin name.
    pub name: String,
    /// Data directory; relative module folders resolve against it.
    pub data_dir: PathBuf,
}

impl PluginRef {
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve `relative` against the data directory.
    pub fn data_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(relative)
    }
}

/// Everything a module receives on `init`.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// The host environment.
    pub host: Arc<HostContext>,
    /// Descriptor the module was loaded from.
    pub descriptor: ModuleDescriptor,
    /// Archive the module was loaded from.
    pub archive: PathBuf,
    /// Plugin owning the registry.
    pub owner: PluginRef,
}

/// Module lifecycle contract.
///
/// The registry calls `init` exactly once, right after instantiation and
/// before the module becomes visible in the loaded-module map.
pub trait Module: Send + Sync + 'static {
    /// Receive the module context.
    fn init(&self, context: ModuleContext) -> Result<(), ModuleError>;

    /// Whether the module is enabled.
    fn is_enabled(&self) -> bool;

    /// Switch the enabled flag, running the enable/disable hook when it
    /// actually changes.
    fn set_enabled(&self, enabled: bool);

    /// Self-reported module name.
    fn name(&self) -> &str;

    /// Access to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared module handle.
pub type DynModule = Arc<dyn Module>;

/// State most `Module` implementations need: the enabled flag and the
/// context handed over by `init`.
#[derive(Debug, Default)]
pub struct ModuleBase {
    enabled: AtomicBool,
    context: OnceLock<ModuleContext>,
}

impl ModuleBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Set the flag to `enabled`. Returns `true` only for the caller that
    /// performed the change.
    pub fn transition(&self, enabled: bool) -> bool {
        self.enabled
            .compare_exchange(!enabled, enabled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store the init context. A second call keeps the first context and
    /// returns `false`.
    pub fn set_context(&self, context: ModuleContext) -> bool {
        self.context.set(context).is_ok()
    }

    /// The init context, once `init` ran.
    pub fn context(&self) -> Option<&ModuleContext> {
        self.context.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_only_reports_changes() {
        let base = ModuleBase::new();
        assert!(!base.is_enabled());
        assert!(!base.transition(false));
        assert!(base.transition(true));
        assert!(!base.transition(true));
        assert!(base.is_enabled());
        assert!(base.transition(false));
        assert!(!base.is_enabled());
    }

    #[test]
    fn test_context_is_set_once() {
        let host = Arc::new(HostContext::new("test-host", semver::Version::new(1, 0, 0)));
        let context = ModuleContext {
            host,
            descriptor: ModuleDescriptor::new("a", "a.Main"),
            archive: PathBuf::from("a.zip"),
            owner: PluginRef::new("owner", "/tmp/owner"),
        };

        let base = ModuleBase::new();
        assert!(base.context().is_none());
        assert!(base.set_context(context.clone()));
        assert!(!base.set_context(context));
        assert_eq!(base.context().unwrap().descriptor.name, "a");
    }

    #[test]
    fn test_plugin_data_path() {
        let owner = PluginRef::new("owner", "/srv/owner");
        assert_eq!(
            owner.data_path("modules/a.zip"),
            PathBuf::from("/srv/owner/modules/a.zip")
        );
    }
}
