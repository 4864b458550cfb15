//! Condition types, change signals and compiled conditions
//!
//! A [`ConditionType`] is a named predicate supplied by the host or an add-in.
//! A [`Condition`] is a compiled expression attached to a tree node; it knows
//! which condition types and properties it reads so the owning context can
//! re-evaluate it when any of them change.

use crate::error::{ExpressionError, Result};
use crate::expr::Expr;
use crate::parser;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Attribute bag passed to a condition type predicate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionArgs {
    values: BTreeMap<String, String>,
}

impl ConditionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Boolean attribute; absent or unparsable values are `false`
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConditionArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = ConditionArgs::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

/// A custom condition predicate
///
/// Implementations that depend on external state expose a [`ChangeSignal`]
/// and call [`ChangeSignal::notify_changed`] whenever that state changes, so
/// every tree node bound to the condition is re-evaluated.
pub trait ConditionType: Send + Sync {
    /// Evaluate the predicate against the call's attribute bag
    fn evaluate(&self, args: &ConditionArgs) -> anyhow::Result<bool>;

    /// Change signal for conditions backed by mutable state
    fn change_signal(&self) -> Option<&ChangeSignal> {
        None
    }
}

impl<F> ConditionType for F
where
    F: Fn(&ConditionArgs) -> anyhow::Result<bool> + Send + Sync,
{
    fn evaluate(&self, args: &ConditionArgs) -> anyhow::Result<bool> {
        self(args)
    }
}

/// Identifier returned by [`ChangeSignal::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Subscriber list a condition provider fires when its state changes
#[derive(Default)]
pub struct ChangeSignal {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Notify every subscriber. Listeners run outside the internal lock so
    /// they may subscribe or unsubscribe.
    pub fn notify_changed(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Environment an expression is evaluated in
pub trait EvalContext {
    /// Look up a context property by name
    fn property(&self, name: &str) -> Option<Value>;

    /// Look up a registered condition type by name
    fn condition_type(&self, name: &str) -> Option<Arc<dyn ConditionType>>;

    /// Report a recoverable evaluation error
    fn report_error(&self, message: &str, error: &dyn fmt::Display) {
        tracing::error!("{}: {}", message, error);
    }
}

/// A compiled condition expression attached to a tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
    condition_types: BTreeSet<String>,
    properties: BTreeSet<String>,
}

impl Condition {
    /// Parse and compile an expression
    pub fn parse(source: &str) -> Result<Self> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            condition_types: expr.condition_types(),
            properties: expr.properties(),
            expr,
        })
    }

    /// Evaluate to a raw value
    pub fn evaluate_value(&self, ctx: &dyn EvalContext) -> Result<Value> {
        self.expr.evaluate(ctx)
    }

    /// Evaluate as a visibility guard. Errors and non-boolean results are
    /// reported to the context and treated as `false`.
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> bool {
        match self.expr.evaluate(ctx) {
            Ok(Value::Bool(b)) => b,
            Ok(other) => {
                ctx.report_error(
                    &format!("Condition '{}' is not boolean", self.source),
                    &ExpressionError::NotBoolean {
                        found: other.type_name().to_string(),
                    },
                );
                false
            }
            Err(e) => {
                ctx.report_error(&format!("Error evaluating condition '{}'", self.source), &e);
                false
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Condition types this condition calls
    pub fn condition_types(&self) -> &BTreeSet<String> {
        &self.condition_types
    }

    /// Context properties this condition reads
    pub fn properties(&self) -> &BTreeSet<String> {
        &self.properties
    }
}

/// Map-backed evaluation context
#[derive(Default, Clone)]
pub struct SimpleContext {
    properties: HashMap<String, Value>,
    conditions: HashMap<String, Arc<dyn ConditionType>>,
}

impl SimpleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn with_condition(mut self, name: &str, condition: Arc<dyn ConditionType>) -> Self {
        self.conditions.insert(name.to_string(), condition);
        self
    }
}

impl EvalContext for SimpleContext {
    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn condition_type(&self, name: &str) -> Option<Arc<dyn ConditionType>> {
        self.conditions.get(name).cloned()
    }
}

/// Parse and evaluate an expression in one step
pub fn evaluate(source: &str, ctx: &dyn EvalContext) -> Result<Value> {
    parser::parse(source)?.evaluate(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_condition_references() {
        let condition = Condition::parse("IsHello(name) and count > 2 or Ready()").unwrap();
        assert_eq!(
            condition.condition_types().iter().collect::<Vec<_>>(),
            vec!["IsHello", "Ready"]
        );
        assert_eq!(
            condition.properties().iter().collect::<Vec<_>>(),
            vec!["count", "name"]
        );
    }

    #[test]
    fn test_non_boolean_guard_is_false() {
        let condition = Condition::parse("1 + 1").unwrap();
        assert!(!condition.evaluate(&SimpleContext::new()));
    }

    #[test]
    fn test_undefined_property_guard_is_false() {
        let condition = Condition::parse("missing == 1").unwrap();
        assert!(!condition.evaluate(&SimpleContext::new()));
    }

    #[test]
    fn test_change_signal_subscribe_and_unsubscribe() {
        let signal = ChangeSignal::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = signal.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.notify_changed();
        signal.unsubscribe(id);
        signal.notify_changed();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_closure_condition_type() {
        let is_set: Arc<dyn ConditionType> =
            Arc::new(|args: &ConditionArgs| -> anyhow::Result<bool> {
                Ok(args.get("value").is_some())
            });
        let ctx = SimpleContext::new().with_condition("IsSet", is_set);
        assert_eq!(evaluate("IsSet(1)", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(evaluate("IsSet()", &ctx).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_get_bool() {
        let args: ConditionArgs = [("ignoreCase", "True"), ("other", "1")].into_iter().collect();
        assert!(args.get_bool("ignoreCase"));
        assert!(!args.get_bool("other"));
        assert!(!args.get_bool("absent"));
    }
}
