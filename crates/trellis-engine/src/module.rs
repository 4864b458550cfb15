//! Code module loading
//!
//! The engine never loads code itself. A [`ModuleLoader`] turns a module
//! name declared in add-in metadata into an [`AddinModule`], which resolves
//! type names to object factories and receives lifecycle hooks.
//! [`StaticModuleLoader`] maps module names to modules registered in-process.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trellis_conditions::ConditionType;
use trellis_core::types::AddinDescription;

/// Object produced by a type factory
pub type Object = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> anyhow::Result<Object> + Send + Sync>;

/// A resolved type: a name plus a factory creating instances of it
#[derive(Clone)]
pub struct TypeHandle {
    name: String,
    factory: Factory,
}

impl TypeHandle {
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(move || -> anyhow::Result<Object> { Ok(Arc::new(factory()?)) }),
        }
    }

    /// A type whose instances are a shared condition type
    pub fn condition(name: impl Into<String>, condition: Arc<dyn ConditionType>) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(move || -> anyhow::Result<Object> { Ok(Arc::new(condition.clone())) }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self) -> anyhow::Result<Object> {
        (self.factory)()
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandle").field("name", &self.name).finish()
    }
}

/// A loaded code module
pub trait AddinModule: Send + Sync {
    /// Resolve a type name declared in metadata
    fn resolve_type(&self, name: &str) -> Option<TypeHandle>;

    /// Called after the owning add-in is loaded
    fn on_load(&self, _addin_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the owning add-in is unloaded
    fn on_unload(&self, _addin_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Loads the code modules named by add-in metadata
pub trait ModuleLoader: Send + Sync {
    fn load_module(
        &self,
        addin: &AddinDescription,
        module: &str,
    ) -> anyhow::Result<Arc<dyn AddinModule>>;
}

type Hook = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Module built from statically registered types
#[derive(Default, Clone)]
pub struct StaticModule {
    types: HashMap<String, TypeHandle>,
    on_load: Option<Hook>,
    on_unload: Option<Hook>,
}

impl StaticModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with a factory
    pub fn with_type<T, F>(mut self, name: &str, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.types
            .insert(name.to_string(), TypeHandle::new(name, factory));
        self
    }

    /// Register a condition type implementation
    pub fn with_condition(mut self, name: &str, condition: Arc<dyn ConditionType>) -> Self {
        self.types
            .insert(name.to_string(), TypeHandle::condition(name, condition));
        self
    }

    pub fn with_on_load(
        mut self,
        hook: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_load = Some(Arc::new(hook));
        self
    }

    pub fn with_on_unload(
        mut self,
        hook: impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_unload = Some(Arc::new(hook));
        self
    }
}

impl AddinModule for StaticModule {
    fn resolve_type(&self, name: &str) -> Option<TypeHandle> {
        self.types.get(name).cloned()
    }

    fn on_load(&self, addin_id: &str) -> anyhow::Result<()> {
        match &self.on_load {
            Some(hook) => hook(addin_id),
            None => Ok(()),
        }
    }

    fn on_unload(&self, addin_id: &str) -> anyhow::Result<()> {
        match &self.on_unload {
            Some(hook) => hook(addin_id),
            None => Ok(()),
        }
    }
}

/// Module loader over in-process modules
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<String, Arc<dyn AddinModule>>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, module: impl AddinModule + 'static) {
        self.modules
            .write()
            .insert(name.to_string(), Arc::new(module));
    }

    pub fn with_module(self, name: &str, module: impl AddinModule + 'static) -> Self {
        self.register(name, module);
        self
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load_module(
        &self,
        addin: &AddinDescription,
        module: &str,
    ) -> anyhow::Result<Arc<dyn AddinModule>> {
        self.modules.read().get(module).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "module '{}' required by add-in '{}' is not registered",
                module,
                addin.id
            )
        })
    }
}
