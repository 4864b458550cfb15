//! The add-in engine
//!
//! [`AddinEngine`] owns the root extension context and the set of loaded
//! add-ins. Loading resolves dependencies, loads code modules, binds the
//! add-in's extension points into every context and rebuilds the extension
//! points it contributes to. All of it happens in one transaction, and all
//! fallible work runs before the first mutation so a failed load leaves the
//! engine untouched.

use crate::context::{ContextInner, ExtensionContext, ExtensionNode, Shared, Transaction};
use crate::error::{EngineError, Result};
use crate::error_sink::{panic_message, ErrorSink};
use crate::events::{AddinErrorEvent, AddinEvent, AddinHandler, HandlerId};
use crate::module::{AddinModule, ModuleLoader, Object, TypeHandle};
use crate::notification::Notification;
use crate::resolver::{DependencyResolver, LoadStep};
use crate::tree::{bake, TreeBuilder, TreeNode};
use camino::Utf8Path;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use trellis_conditions::{ConditionType, Value};
use trellis_core::path;
use trellis_core::types::{
    AddinDescription, EngineConfig, ExtensionPointDescription, ModuleDescription,
    NodeSetDescription, PropertyValue,
};
use trellis_core::{AddinRegistry, MemoryRegistry};

/// A loaded add-in
pub(crate) struct RuntimeAddin {
    description: Arc<AddinDescription>,
    /// Loaded code modules, main module first
    modules: Vec<Arc<dyn AddinModule>>,
    /// Indices of the optional modules that were activated
    active_optional: Vec<usize>,
    condition_types: Vec<(String, Arc<dyn ConditionType>)>,
}

impl RuntimeAddin {
    fn id(&self) -> &str {
        &self.description.id
    }

    fn active_modules(&self) -> impl Iterator<Item = &ModuleDescription> {
        std::iter::once(&self.description.main_module).chain(
            self.active_optional
                .iter()
                .filter_map(|&i| self.description.optional_modules.get(i)),
        )
    }

    fn resolve_type(&self, name: &str) -> Option<TypeHandle> {
        self.modules.iter().find_map(|m| m.resolve_type(name))
    }
}

#[derive(Default)]
struct EngineState {
    /// Loaded add-ins in load order
    loaded: Vec<Arc<RuntimeAddin>>,
    bound_extension_points: BTreeMap<String, Arc<ExtensionPointDescription>>,
    node_sets: HashMap<String, NodeSetDescription>,
    runtime_enabled: HashSet<String>,
    runtime_disabled: HashSet<String>,
}

pub(crate) struct EngineInner {
    registry: Arc<dyn AddinRegistry>,
    loader: Arc<dyn ModuleLoader>,
    config: EngineConfig,
    state: RwLock<EngineState>,
    shared: Arc<Shared>,
    root: Arc<ContextInner>,
    loaded_handlers: Mutex<Vec<(HandlerId, AddinHandler)>>,
    unloaded_handlers: Mutex<Vec<(HandlerId, AddinHandler)>>,
    running: AtomicBool,
}

impl EngineInner {
    fn sink(&self) -> &ErrorSink {
        &self.shared.sink
    }

    fn ensure_running(&self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EngineError::EngineShutdown)
        }
    }

    /// Registry state combined with the runtime overrides
    pub fn is_enabled(&self, addin_id: &str) -> bool {
        if self.registry.get_addin(addin_id).is_none() {
            return false;
        }
        let state = self.state.read();
        if state.runtime_disabled.contains(addin_id) {
            return false;
        }
        state.runtime_enabled.contains(addin_id) || self.registry.is_addin_enabled(addin_id)
    }

    pub fn is_loaded(&self, addin_id: &str) -> bool {
        self.state.read().loaded.iter().any(|a| a.id() == addin_id)
    }

    fn loaded_addin(&self, addin_id: &str) -> Option<Arc<RuntimeAddin>> {
        self.state
            .read()
            .loaded
            .iter()
            .find(|a| a.id() == addin_id)
            .cloned()
    }

    fn loaded_ids(&self) -> Vec<String> {
        self.state
            .read()
            .loaded
            .iter()
            .map(|a| a.id().to_string())
            .collect()
    }

    pub fn bound_extension_point(&self, ep_path: &str) -> Option<Arc<ExtensionPointDescription>> {
        self.state.read().bound_extension_points.get(ep_path).cloned()
    }

    /// Path of the innermost registered extension point containing `target`
    fn innermost_extension_point(&self, target: &str) -> Option<String> {
        self.registry
            .extension_points()
            .into_iter()
            .filter(|ep| path::is_within(target, &ep.path))
            .max_by_key(|ep| ep.path.len())
            .map(|ep| ep.path.clone())
    }

    // Loading

    fn load_in(&self, tx: &Transaction<'_>, addin_id: &str) -> Result<()> {
        if self.is_loaded(addin_id) {
            return Ok(());
        }
        let is_enabled = |id: &str| self.is_enabled(id);
        let is_loaded = |id: &str| self.is_loaded(id);
        let plan = DependencyResolver::new(
            self.registry.as_ref(),
            self.config.check_dependency_versions,
            &is_enabled,
            &is_loaded,
        )
        .resolve(addin_id)?;
        debug!(
            "Load plan for {}: {}",
            addin_id,
            plan.iter()
                .map(|s| s.addin.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let prepared = plan
            .into_iter()
            .map(|step| self.prepare(step))
            .collect::<Result<Vec<_>>>()?;
        for addin in prepared {
            self.activate(tx, addin);
        }
        Ok(())
    }

    /// Load code modules and condition types; no engine state is touched
    fn prepare(&self, step: LoadStep) -> Result<RuntimeAddin> {
        let addin = step.addin;
        let mut modules = Vec::new();
        if let Some(name) = &addin.main_module.module {
            modules.push(self.load_module(&addin, name)?);
        }

        let mut active_optional = Vec::new();
        for index in step.optional_modules {
            let Some(module) = addin.optional_modules.get(index) else {
                continue;
            };
            match &module.module {
                None => active_optional.push(index),
                Some(name) => match self.load_module(&addin, name) {
                    Ok(loaded) => {
                        modules.push(loaded);
                        active_optional.push(index);
                    }
                    Err(e) => self.sink().report(
                        &format!("Skipping optional module {} of add-in {}", name, addin.id),
                        Some(addin.id.as_str()),
                        Some(&e),
                    ),
                },
            }
        }

        let mut condition_types = Vec::new();
        for declared in &addin.condition_types {
            let handle = modules
                .iter()
                .find_map(|m| m.resolve_type(&declared.type_name))
                .ok_or_else(|| {
                    EngineError::type_resolution(
                        &addin.id,
                        &declared.type_name,
                        "type not found in the add-in's modules",
                    )
                })?;
            let object = create(&handle)
                .map_err(|e| EngineError::type_resolution(&addin.id, &declared.type_name, e.to_string()))?;
            let condition = object
                .downcast::<Arc<dyn ConditionType>>()
                .map_err(|_| {
                    EngineError::type_resolution(
                        &addin.id,
                        &declared.type_name,
                        "type is not a condition type",
                    )
                })?;
            condition_types.push((declared.id.clone(), condition.as_ref().clone()));
        }

        Ok(RuntimeAddin {
            description: addin,
            modules,
            active_optional,
            condition_types,
        })
    }

    fn load_module(&self, addin: &AddinDescription, module: &str) -> Result<Arc<dyn AddinModule>> {
        let loaded = catch_unwind(AssertUnwindSafe(|| self.loader.load_module(addin, module)))
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!(
                    "module loader panicked: {}",
                    panic_message(&*payload)
                ))
            });
        loaded.map_err(|e| EngineError::ModuleLoad {
            addin: addin.id.clone(),
            module: module.to_string(),
            message: e.to_string(),
        })
    }

    fn activate(&self, tx: &Transaction<'_>, runtime: RuntimeAddin) {
        let runtime = Arc::new(runtime);
        let description = runtime.description.clone();

        let mut bound = Vec::new();
        {
            let mut state = self.state.write();
            state.loaded.push(runtime.clone());
            for declared in &description.extension_points {
                let Some(ep) = self.registry.extension_point(&declared.path) else {
                    continue;
                };
                if let Some(set_id) = &ep.node_set.id {
                    state.node_sets.insert(set_id.clone(), ep.node_set.clone());
                }
                state
                    .bound_extension_points
                    .insert(ep.path.clone(), ep.clone());
                bound.push(ep);
            }
            for set in &description.node_sets {
                if let Some(set_id) = &set.id {
                    state.node_sets.insert(set_id.clone(), set.clone());
                }
            }
        }

        let contexts = self.root.descendants();
        for ep in &bound {
            for ctx in &contexts {
                self.bind_extension_point(tx, ctx, ep);
            }
        }
        for (id, condition_type) in &runtime.condition_types {
            self.root.register_condition(id, condition_type.clone());
        }
        self.rebuild_contributions(tx, &description, &contexts);

        let modules = runtime.modules.clone();
        let addin_id = description.id.clone();
        let sink = self.shared.sink.clone();
        tx.defer(Notification::for_addin(description.id.clone(), move || {
            for module in &modules {
                if let Err(e) = module.on_load(&addin_id) {
                    sink.report("Add-in load hook failed", Some(addin_id.as_str()), Some(&e));
                }
            }
        }));
        self.defer_addin_event(tx, &self.loaded_handlers, &description.id);
        info!("Loaded add-in {} {}", description.id, description.version);
    }

    /// Bind `ep` into the tree of `ctx`. The root context creates the path
    /// segments leading to it; child contexts only bind nodes they already
    /// copied and pick up the rest from the root on demand.
    fn bind_extension_point(
        &self,
        tx: &Transaction<'_>,
        ctx: &Arc<ContextInner>,
        ep: &Arc<ExtensionPointDescription>,
    ) {
        let may_create = Arc::ptr_eq(ctx, &self.root);
        let segments: Vec<&str> = path::segments(&ep.path).collect();
        let Some((last, leading)) = segments.split_last() else {
            return;
        };

        let mut node = ctx.root().clone();
        for segment in leading {
            node = match node.child(segment) {
                Some(child) => child,
                None if may_create && node.is_bare() => node.get_or_create_child(tx, ctx, segment),
                None => return,
            };
        }

        match node.child(last) {
            Some(existing) => {
                if existing.extension_point().is_some() {
                    return;
                }
                for child in existing.children().iter() {
                    ctx.unbind_subtree(child);
                }
                existing.set_extension_point(Some(ep.clone()));
                existing.set_children(Vec::new());
                existing.set_loaded(false);
                tx.children_changed(ctx, &existing);
            }
            None if may_create && node.is_bare() => {
                node.add_child(tx, ctx, TreeNode::anchor(&node, last, ep.clone()));
            }
            None => {}
        }
    }

    /// Rebuild every loaded extension point `addin` contributes to
    fn rebuild_contributions(
        &self,
        tx: &Transaction<'_>,
        addin: &AddinDescription,
        contexts: &[Arc<ContextInner>],
    ) {
        let targets: BTreeSet<String> = addin
            .all_extensions()
            .filter_map(|e| self.innermost_extension_point(&e.path))
            .collect();
        for target in &targets {
            for ctx in contexts {
                let Some(node) = ctx.find_node(target) else {
                    continue;
                };
                let Some(ep) = node.extension_point() else {
                    continue;
                };
                if ep.path != *target || !node.is_loaded() || tx.is_loading(node.key()) {
                    continue;
                }
                debug!("Rebuilding {} in context {}", target, ctx.id());
                self.populate(ctx, &node, &ep, tx, false);
            }
        }
    }

    /// Fill an extension point node from its contributors in load order.
    /// With `load_new`, enabled contributors that are not loaded yet are
    /// loaded first; failures are reported and the add-in left out.
    pub fn populate(
        &self,
        ctx: &Arc<ContextInner>,
        node: &Arc<TreeNode>,
        ep: &ExtensionPointDescription,
        tx: &Transaction<'_>,
        load_new: bool,
    ) {
        if load_new && self.running.load(Ordering::Acquire) {
            for addin_id in &ep.addins {
                if self.is_loaded(addin_id) || !self.is_enabled(addin_id) {
                    continue;
                }
                if let Err(e) = self.load_in(tx, addin_id) {
                    self.sink().report(
                        &format!("Could not load add-in {} extending {}", addin_id, ep.path),
                        Some(addin_id.as_str()),
                        Some(&e),
                    );
                }
            }
        }

        let (contributors, node_sets) = {
            let state = self.state.read();
            let contributors: Vec<Arc<RuntimeAddin>> = state
                .loaded
                .iter()
                .filter(|a| ep.addins.contains(a.id()))
                .cloned()
                .collect();
            (contributors, state.node_sets.clone())
        };

        let mut builder = TreeBuilder::new(ep, &node_sets, self.sink());
        for addin in &contributors {
            for module in addin.active_modules() {
                for extension in &module.extensions {
                    // Nested extension points populate their own nodes
                    if self.innermost_extension_point(&extension.path).as_deref()
                        == Some(ep.path.as_str())
                    {
                        builder.add_extension(addin.id(), extension);
                    }
                }
            }
        }
        bake(ctx, node, builder.finish(), tx, &|p| self.bound_extension_point(p));
    }

    /// Load the enabled owners of extension points at or below `prefix`
    pub fn load_extension_point_owners(&self, prefix: &str) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let owners: BTreeSet<String> = self
            .registry
            .extension_points()
            .iter()
            .filter(|ep| path::is_within(&ep.path, prefix))
            .map(|ep| ep.owner.clone())
            .filter(|owner| !self.is_loaded(owner) && self.is_enabled(owner))
            .collect();
        if owners.is_empty() {
            return;
        }
        let tx = self.root.begin();
        for owner in owners {
            debug!("Loading {} for extension path {}", owner, prefix);
            if let Err(e) = self.load_in(&tx, &owner) {
                self.sink().report(
                    &format!("Could not load add-in {} defining {}", owner, prefix),
                    Some(owner.as_str()),
                    Some(&e),
                );
            }
        }
    }

    // Unloading

    fn unload_in(&self, tx: &Transaction<'_>, addin_id: &str) {
        if !self.is_loaded(addin_id) {
            return;
        }

        let dependents: Vec<String> = self
            .loaded_ids()
            .into_iter()
            .rev()
            .filter(|other| other != addin_id && self.registry.addin_depends_on(other, addin_id))
            .collect();
        for dependent in dependents {
            self.unload_in(tx, &dependent);
        }

        let runtime = {
            let mut state = self.state.write();
            let Some(index) = state.loaded.iter().position(|a| a.id() == addin_id) else {
                return;
            };
            let runtime = state.loaded.remove(index);
            for ep in &runtime.description.extension_points {
                state.bound_extension_points.remove(&ep.path);
                if let Some(set_id) = &ep.node_set.id {
                    state.node_sets.remove(set_id);
                }
            }
            for set in &runtime.description.node_sets {
                if let Some(set_id) = &set.id {
                    state.node_sets.remove(set_id);
                }
            }
            runtime
        };
        let description = runtime.description.clone();

        let contexts = self.root.descendants();
        for ep in &description.extension_points {
            for ctx in &contexts {
                self.remove_extension_point(tx, ctx, &ep.path);
            }
        }
        for (id, _) in &runtime.condition_types {
            self.root.unregister_condition(id);
        }
        self.rebuild_contributions(tx, &description, &contexts);

        let modules = runtime.modules.clone();
        let id = description.id.clone();
        let sink = self.shared.sink.clone();
        tx.defer(Notification::for_addin(description.id.clone(), move || {
            for module in &modules {
                if let Err(e) = module.on_unload(&id) {
                    sink.report("Add-in unload hook failed", Some(id.as_str()), Some(&e));
                }
            }
        }));
        self.defer_addin_event(tx, &self.unloaded_handlers, &description.id);
        info!("Unloaded add-in {}", description.id);
    }

    /// Detach the extension point at `ep_path` from the tree of `ctx`,
    /// removing everything contributed below it
    fn remove_extension_point(&self, tx: &Transaction<'_>, ctx: &Arc<ContextInner>, ep_path: &str) {
        let Some(node) = ctx.find_node(ep_path) else {
            return;
        };
        if node.extension_point().is_none_or(|ep| ep.path != ep_path) {
            return;
        }

        for child in node.children().iter() {
            ctx.unbind_subtree(child);
        }
        node.set_children(Vec::new());
        tx.children_changed(ctx, &node);

        if node.data().is_some() {
            // A contributed node that also hosted an extension point
            node.set_extension_point(None);
            node.set_loaded(true);
            return;
        }

        let Some(mut parent) = node.parent() else {
            return;
        };
        parent.remove_child(tx, ctx, node.id());
        // Drop path segments that only led to the removed anchor
        while parent.is_bare() && parent.children().is_empty() {
            let Some(grandparent) = parent.parent() else {
                break;
            };
            grandparent.remove_child(tx, ctx, parent.id());
            parent = grandparent;
        }
    }

    fn defer_addin_event(
        &self,
        tx: &Transaction<'_>,
        handlers: &Mutex<Vec<(HandlerId, AddinHandler)>>,
        addin_id: &str,
    ) {
        let handlers: Vec<AddinHandler> = handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        if handlers.is_empty() {
            return;
        }
        let event = AddinEvent {
            addin_id: addin_id.to_string(),
        };
        let sink = self.shared.sink.clone();
        tx.defer(Notification::new(move || {
            for handler in &handlers {
                sink.guard(Some(event.addin_id.as_str()), "add-in event handler", || {
                    handler(&event)
                });
            }
        }));
    }

    // Types

    /// Resolve a type declared by `addin_id`, loading the add-in if needed
    pub fn resolve_type(&self, addin_id: &str, name: &str) -> Result<TypeHandle> {
        self.ensure_running()?;
        {
            let tx = self.root.begin();
            self.load_in(&tx, addin_id)?;
        }
        let addin = self
            .loaded_addin(addin_id)
            .ok_or_else(|| EngineError::UnknownAddin {
                id: addin_id.to_string(),
            })?;
        addin.resolve_type(name).ok_or_else(|| {
            EngineError::type_resolution(addin_id, name, "type not found in the add-in's modules")
        })
    }

    pub fn create_object(&self, addin_id: &str, name: &str) -> Result<Object> {
        let handle = self.resolve_type(addin_id, name)?;
        create(&handle).map_err(|e| EngineError::type_resolution(addin_id, name, e.to_string()))
    }
}

/// Run a type factory, turning a panic into an error
fn create(handle: &TypeHandle) -> anyhow::Result<Object> {
    catch_unwind(AssertUnwindSafe(|| handle.create())).unwrap_or_else(|payload| {
        Err(anyhow::anyhow!(
            "factory for {} panicked: {}",
            handle.name(),
            panic_message(&*payload)
        ))
    })
}

fn property_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Integer(i) => Value::Integer(*i),
        PropertyValue::Float(f) => Value::Float(*f),
        PropertyValue::String(s) => Value::Str(s.clone()),
    }
}

/// Loads add-ins from a registry and exposes their extension tree
pub struct AddinEngine {
    inner: Arc<EngineInner>,
    context: ExtensionContext,
}

impl AddinEngine {
    pub fn new(
        registry: Arc<dyn AddinRegistry>,
        loader: Arc<dyn ModuleLoader>,
        config: EngineConfig,
    ) -> Self {
        let shared = Arc::new(Shared::new(Arc::new(ErrorSink::new())));
        let state = EngineState {
            runtime_enabled: config.enabled_addins.iter().cloned().collect(),
            runtime_disabled: config.disabled_addins.iter().cloned().collect(),
            ..EngineState::default()
        };
        let inner = Arc::new_cyclic(|engine| EngineInner {
            registry,
            loader,
            state: RwLock::new(state),
            root: Arc::new(ContextInner::new_root(shared.clone(), engine.clone())),
            shared,
            loaded_handlers: Mutex::new(Vec::new()),
            unloaded_handlers: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
            config,
        });
        for (name, value) in &inner.config.properties {
            inner.root.set_property(name, property_value(value));
        }
        let context = ExtensionContext::from_inner(inner.root.clone());
        Self { inner, context }
    }

    /// Engine over a YAML or JSON registry document
    pub fn from_registry_file(
        path: &Utf8Path,
        loader: Arc<dyn ModuleLoader>,
        config: EngineConfig,
    ) -> Result<Self> {
        let registry = MemoryRegistry::load(path)?;
        debug!("Loaded registry {} with {} add-ins", path, registry.len());
        Ok(Self::new(Arc::new(registry), loader, config))
    }

    /// Load every enabled root add-in when configured to. Failures are
    /// reported to the error handlers and do not stop the others.
    pub fn initialize(&self) -> Result<()> {
        self.inner.ensure_running()?;
        if !self.inner.config.initialize_roots {
            return Ok(());
        }
        let tx = self.inner.root.begin();
        for addin in self.inner.registry.root_addins() {
            if !self.inner.is_enabled(&addin.id) {
                continue;
            }
            if let Err(e) = self.inner.load_in(&tx, &addin.id) {
                self.inner.sink().report(
                    &format!("Failed to load root add-in {}", addin.id),
                    Some(addin.id.as_str()),
                    Some(&e),
                );
            }
        }
        info!(
            "Add-in engine initialized with {} loaded add-ins",
            self.inner.state.read().loaded.len()
        );
        Ok(())
    }

    /// Load an add-in and its dependencies. Loading a loaded add-in is a
    /// no-op.
    pub fn load_addin(&self, addin_id: &str) -> Result<()> {
        self.inner.ensure_running()?;
        let tx = self.inner.root.begin();
        self.inner.load_in(&tx, addin_id)
    }

    /// Unload an add-in and every loaded add-in depending on it
    pub fn unload_addin(&self, addin_id: &str) -> Result<()> {
        self.inner.ensure_running()?;
        let tx = self.inner.root.begin();
        self.inner.unload_in(&tx, addin_id);
        Ok(())
    }

    pub fn is_loaded(&self, addin_id: &str) -> bool {
        self.inner.is_loaded(addin_id)
    }

    /// Loaded add-in ids in load order
    pub fn loaded_addins(&self) -> Vec<String> {
        self.inner.loaded_ids()
    }

    pub fn is_addin_enabled(&self, addin_id: &str) -> bool {
        self.inner.is_enabled(addin_id)
    }

    /// Enable an add-in at runtime, loading it when it is a root add-in or
    /// extends a bound extension point
    pub fn enable_addin(&self, addin_id: &str) -> Result<()> {
        self.inner.ensure_running()?;
        let addin = self
            .inner
            .registry
            .get_addin(addin_id)
            .ok_or_else(|| EngineError::UnknownAddin {
                id: addin_id.to_string(),
            })?;
        let tx = self.inner.root.begin();
        {
            let mut state = self.inner.state.write();
            state.runtime_disabled.remove(addin_id);
            state.runtime_enabled.insert(addin_id.to_string());
        }
        let extends_bound = addin.all_extensions().any(|e| {
            self.inner
                .innermost_extension_point(&e.path)
                .is_some_and(|p| self.inner.bound_extension_point(&p).is_some())
        });
        if addin.is_root || extends_bound {
            self.inner.load_in(&tx, addin_id)?;
        }
        Ok(())
    }

    /// Disable an add-in at runtime, unloading it and its dependents
    pub fn disable_addin(&self, addin_id: &str) -> Result<()> {
        self.inner.ensure_running()?;
        if self.inner.registry.get_addin(addin_id).is_none() {
            return Err(EngineError::UnknownAddin {
                id: addin_id.to_string(),
            });
        }
        let tx = self.inner.root.begin();
        {
            let mut state = self.inner.state.write();
            state.runtime_enabled.remove(addin_id);
            state.runtime_disabled.insert(addin_id.to_string());
        }
        self.inner.unload_in(&tx, addin_id);
        Ok(())
    }

    /// Resolve a type declared by an add-in, loading it on demand
    pub fn resolve_type(&self, addin_id: &str, name: &str) -> Result<TypeHandle> {
        self.inner.resolve_type(addin_id, name)
    }

    /// Create an object of a type declared by an add-in
    pub fn create_object<T: Any + Send + Sync>(&self, addin_id: &str, name: &str) -> Result<Arc<T>> {
        self.inner
            .create_object(addin_id, name)?
            .downcast::<T>()
            .map_err(|_| EngineError::UnexpectedObjectType {
                type_name: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
            })
    }

    /// Unload every add-in in reverse load order. Later loads fail with
    /// [`EngineError::EngineShutdown`].
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let tx = self.inner.root.begin();
        for addin_id in self.inner.loaded_ids().into_iter().rev() {
            self.inner.unload_in(&tx, &addin_id);
        }
        info!("Add-in engine shut down");
    }

    pub fn registry(&self) -> &Arc<dyn AddinRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The root extension context
    pub fn context(&self) -> &ExtensionContext {
        &self.context
    }

    /// New child context of the root context
    pub fn create_extension_context(&self) -> Result<ExtensionContext> {
        self.context.create_child_context()
    }

    pub fn get_extension_node(&self, path: &str) -> Option<Arc<ExtensionNode>> {
        self.context.get_extension_node(path)
    }

    pub fn get_extension_nodes(&self, path: &str) -> Vec<Arc<ExtensionNode>> {
        self.context.get_extension_nodes(path)
    }

    pub fn get_extension_objects<T: Any + Send + Sync>(&self, path: &str) -> Result<Vec<Arc<T>>> {
        self.context.get_extension_objects(path)
    }

    pub fn on_addin_loaded(&self, handler: impl Fn(&AddinEvent) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId::next();
        self.inner.loaded_handlers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn on_addin_unloaded(
        &self,
        handler: impl Fn(&AddinEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId::next();
        self.inner
            .unloaded_handlers
            .lock()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_addin_handler(&self, id: HandlerId) -> bool {
        let mut removed = false;
        for handlers in [&self.inner.loaded_handlers, &self.inner.unloaded_handlers] {
            let mut handlers = handlers.lock();
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Receive every error reported by the engine: condition failures,
    /// handler panics, skipped nodes and modules
    pub fn on_error(
        &self,
        handler: impl Fn(&AddinErrorEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.shared.sink.add_handler(Arc::new(handler))
    }

    pub fn remove_error_handler(&self, id: HandlerId) -> bool {
        self.inner.shared.sink.remove_handler(id)
    }
}

impl std::fmt::Debug for AddinEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddinEngine")
            .field("loaded", &self.loaded_addins())
            .field("running", &self.inner.running.load(Ordering::Acquire))
            .finish()
    }
}
