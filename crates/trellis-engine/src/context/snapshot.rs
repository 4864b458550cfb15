//! Immutable per-context condition state
//!
//! A [`ContextSnapshot`] holds the condition types and properties registered
//! in one context plus the tree nodes whose conditions read them. Writers
//! replace it under the transaction lock; readers clone the `Arc` and work on
//! a consistent point-in-time view.

use crate::tree::TreeNode;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use trellis_conditions::{Condition, ConditionType, SubscriptionId, Value};

type Bindings = BTreeMap<u64, Weak<TreeNode>>;

/// A condition id as seen by one context
#[derive(Clone, Default)]
pub(crate) struct ConditionInfo {
    /// Registered implementation; `None` when the id is only referenced
    /// here and resolved through the parent context
    pub condition_type: Option<Arc<dyn ConditionType>>,
    /// Subscription to the implementation's change signal
    pub subscription: Option<SubscriptionId>,
    bound: Bindings,
}

#[derive(Clone, Default)]
pub(crate) struct ContextSnapshot {
    pub conditions: HashMap<String, ConditionInfo>,
    pub properties: HashMap<String, Value>,
    property_bindings: HashMap<String, Bindings>,
}

impl ContextSnapshot {
    /// Bind a node to every condition type and property its condition reads
    pub fn bind(&mut self, node: &Arc<TreeNode>, condition: &Condition) {
        for id in condition.condition_types() {
            self.conditions
                .entry(id.clone())
                .or_default()
                .bound
                .insert(node.key(), Arc::downgrade(node));
        }
        for name in condition.properties() {
            self.property_bindings
                .entry(name.clone())
                .or_default()
                .insert(node.key(), Arc::downgrade(node));
        }
    }

    pub fn unbind(&mut self, key: u64, condition: &Condition) {
        for id in condition.condition_types() {
            if let Some(info) = self.conditions.get_mut(id) {
                info.bound.remove(&key);
                if info.condition_type.is_none() && info.bound.is_empty() {
                    self.conditions.remove(id);
                }
            }
        }
        for name in condition.properties() {
            if let Some(bound) = self.property_bindings.get_mut(name) {
                bound.remove(&key);
                if bound.is_empty() {
                    self.property_bindings.remove(name);
                }
            }
        }
    }

    /// Implementation registered in this context
    pub fn condition_type(&self, id: &str) -> Option<Arc<dyn ConditionType>> {
        self.conditions
            .get(id)
            .and_then(|info| info.condition_type.clone())
    }

    /// True when this context registers its own implementation for `id`
    pub fn overrides_condition(&self, id: &str) -> bool {
        self.conditions
            .get(id)
            .is_some_and(|info| info.condition_type.is_some())
    }

    pub fn overrides_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Live nodes whose condition calls `id`
    pub fn nodes_bound_to_condition(&self, id: &str) -> Vec<Arc<TreeNode>> {
        self.conditions
            .get(id)
            .map(|info| live(&info.bound))
            .unwrap_or_default()
    }

    /// Live nodes whose condition reads property `name`
    pub fn nodes_bound_to_property(&self, name: &str) -> Vec<Arc<TreeNode>> {
        self.property_bindings
            .get(name)
            .map(live)
            .unwrap_or_default()
    }

    /// Subscriptions held by this snapshot's registered condition types
    pub fn subscriptions(&self) -> Vec<(Arc<dyn ConditionType>, SubscriptionId)> {
        self.conditions
            .values()
            .filter_map(|info| Some((info.condition_type.clone()?, info.subscription?)))
            .collect()
    }
}

fn live(bound: &Bindings) -> Vec<Arc<TreeNode>> {
    bound.values().filter_map(Weak::upgrade).collect()
}
