//! Extension context integration tests
//!
//! Tests visibility, subscriptions and child contexts including:
//! - Replay of existing children on subscription
//! - Property and condition-type driven visibility
//! - Add-in provided condition types
//! - Per-context overrides in child contexts

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trellis_conditions::{ChangeSignal, ConditionArgs, ConditionType};
use trellis_engine::{AddinEngine, EngineError, NodeChange, StaticModule, StaticModuleLoader};

/// Condition backed by a host-side flag
#[derive(Default)]
struct Flag {
    on: AtomicBool,
    signal: ChangeSignal,
}

impl Flag {
    fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
        self.signal.notify_changed();
    }
}

impl ConditionType for Flag {
    fn evaluate(&self, _args: &ConditionArgs) -> anyhow::Result<bool> {
        Ok(self.on.load(Ordering::SeqCst))
    }

    fn change_signal(&self) -> Option<&ChangeSignal> {
        Some(&self.signal)
    }
}

fn mode_engine() -> AddinEngine {
    engine_with(vec![
        AddinBuilder::host("host", COMMANDS).build(),
        AddinBuilder::new("tools")
            .extends(
                COMMANDS,
                vec![conditional_node("edit", "Mode == 'edit'"), node("always")],
            )
            .build(),
    ])
}

fn context_ids(ctx: &trellis_engine::ExtensionContext, path: &str) -> Vec<String> {
    ctx.get_extension_nodes(path)
        .iter()
        .map(|n| n.id().to_string())
        .collect()
}

#[cfg(test)]
mod subscription_tests {
    use super::*;

    #[test]
    fn test_subscribe_replays_existing_children() {
        let engine = commands_engine(&["a", "b", "c"]);
        let recorder = NodeEventRecorder::new();

        recorder.attach(engine.context(), COMMANDS);

        assert_eq!(recorder.added(), vec!["a-node", "b-node", "c-node"]);
        assert!(recorder.removed().is_empty());
    }

    #[test]
    fn test_second_subscriber_gets_its_own_replay() {
        let engine = commands_engine(&["a", "b"]);
        let first = NodeEventRecorder::new();
        let second = NodeEventRecorder::new();

        first.attach(engine.context(), COMMANDS);
        second.attach(engine.context(), COMMANDS);

        assert_eq!(first.added().len(), 2);
        assert_eq!(second.added().len(), 2);
    }

    #[test]
    fn test_enable_and_disable_deliver_matching_events() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("late")
                .disabled()
                .extends(COMMANDS, vec![node("late-node")])
                .build(),
        ]);
        let recorder = NodeEventRecorder::new();
        recorder.attach(engine.context(), COMMANDS);
        assert!(recorder.events().is_empty());

        engine.enable_addin("late").unwrap();
        engine.disable_addin("late").unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                (NodeChange::Added, "late-node".to_string()),
                (NodeChange::Removed, "late-node".to_string()),
            ]
        );
    }

    #[test]
    fn test_removed_handler_stops_receiving() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("late")
                .disabled()
                .extends(COMMANDS, vec![node("late-node")])
                .build(),
        ]);
        let events = Arc::new(Mutex::new(0));
        let seen = events.clone();
        let id = engine
            .context()
            .add_extension_node_handler(COMMANDS, move |_| *seen.lock() += 1)
            .unwrap();

        assert!(engine
            .context()
            .remove_extension_node_handler(COMMANDS, id)
            .unwrap());
        engine.enable_addin("late").unwrap();

        assert_eq!(*events.lock(), 0);
    }

    #[test]
    fn test_subscribing_to_missing_path_fails() {
        let engine = commands_engine(&[]);
        let err = engine
            .context()
            .add_extension_node_handler("/nowhere", |_| {})
            .unwrap_err();
        assert!(matches!(err, EngineError::ExtensionPathNotFound { .. }));
    }

    #[test]
    fn test_node_loaded_and_extension_changed_handlers() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(COMMANDS, vec![node("open")])
                .build(),
        ]);
        let loaded = Arc::new(Mutex::new(Vec::new()));
        let changed = Arc::new(Mutex::new(Vec::new()));
        let (l, c) = (loaded.clone(), changed.clone());
        engine
            .context()
            .add_node_loaded_handler(move |node| l.lock().push(node.path().to_string()));
        engine
            .context()
            .add_extension_changed_handler(move |event| c.lock().push(event.path.clone()));

        child_ids(&engine, COMMANDS);

        assert_eq!(*loaded.lock(), vec!["/host/Commands/open"]);
        assert!(changed.lock().iter().any(|p| p == COMMANDS));
    }

    #[test]
    fn test_panicking_handler_is_reported() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("late")
                .disabled()
                .extends(COMMANDS, vec![node("late-node")])
                .build(),
        ]);
        let errors = ErrorRecorder::attach(&engine);
        let recorder = NodeEventRecorder::new();
        engine
            .context()
            .add_extension_node_handler(COMMANDS, |_| panic!("handler bug"))
            .unwrap();
        recorder.attach(engine.context(), COMMANDS);

        engine.enable_addin("late").unwrap();

        // The second handler still saw the change
        assert_eq!(recorder.added(), vec!["late-node"]);
        assert!(errors.messages().iter().any(|m| m.contains("handler bug")));
    }
}

#[cfg(test)]
mod condition_tests {
    use super::*;

    #[test]
    fn test_property_controls_visibility() {
        let engine = mode_engine();
        assert_eq!(child_ids(&engine, COMMANDS), vec!["always"]);

        let recorder = NodeEventRecorder::new();
        recorder.attach(engine.context(), COMMANDS);
        recorder.clear();

        engine.context().set_property("Mode", "edit").unwrap();
        assert_eq!(child_ids(&engine, COMMANDS), vec!["edit", "always"]);
        assert_eq!(recorder.added(), vec!["edit"]);

        engine.context().set_property("Mode", "view").unwrap();
        assert_eq!(child_ids(&engine, COMMANDS), vec!["always"]);
        assert_eq!(recorder.removed(), vec!["edit"]);
    }

    #[test]
    fn test_hidden_node_is_not_addressable() {
        let engine = mode_engine();
        assert!(engine.get_extension_node("/host/Commands/edit").is_none());

        engine.context().set_property("Mode", "edit").unwrap();
        assert!(engine.get_extension_node("/host/Commands/edit").is_some());
    }

    #[test]
    fn test_condition_type_change_signal_updates_visibility() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(COMMANDS, vec![conditional_node("gated", "IsOn()")])
                .build(),
        ]);
        let flag = Arc::new(Flag::default());
        engine
            .context()
            .register_condition_arc("IsOn", flag.clone())
            .unwrap();
        let recorder = NodeEventRecorder::new();
        recorder.attach(engine.context(), COMMANDS);
        assert!(recorder.events().is_empty());

        flag.set(true);
        assert_eq!(recorder.added(), vec!["gated"]);

        flag.set(false);
        assert_eq!(recorder.removed(), vec!["gated"]);
    }

    #[test]
    fn test_unregistered_condition_hides_node_and_reports() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(
                    COMMANDS,
                    vec![conditional_node("ghost", "Missing()"), node("plain")],
                )
                .build(),
        ]);
        let errors = ErrorRecorder::attach(&engine);

        assert_eq!(child_ids(&engine, COMMANDS), vec!["plain"]);
        assert!(errors.messages().iter().any(|m| m.contains("[tools]")));
    }

    #[test]
    fn test_addin_provided_condition_type() {
        let has_role: Arc<dyn ConditionType> =
            Arc::new(|args: &ConditionArgs| -> anyhow::Result<bool> {
                Ok(args.get("value") == Some("admin"))
            });
        let loader = StaticModuleLoader::new().with_module(
            "security",
            StaticModule::new().with_condition("RoleCondition", has_role),
        );
        let engine = engine_with_loader(
            vec![
                AddinBuilder::host("host", COMMANDS).build(),
                AddinBuilder::new("security")
                    .module("security")
                    .condition_type("HasRole", "RoleCondition")
                    .build(),
                AddinBuilder::new("tools")
                    .depends_on("security")
                    .extends(
                        COMMANDS,
                        vec![
                            conditional_node("admin-only", "HasRole('admin')"),
                            conditional_node("guest-only", "HasRole('guest')"),
                        ],
                    )
                    .build(),
            ],
            Arc::new(loader),
        );

        assert_eq!(child_ids(&engine, COMMANDS), vec!["admin-only"]);

        // Unloading the provider hides nodes that depend on it
        engine.unload_addin("security").unwrap();
        assert!(!engine.is_loaded("tools"));
    }

    #[test]
    fn test_missing_condition_type_fails_the_load() {
        let engine = engine_with(vec![AddinBuilder::new("security")
            .condition_type("HasRole", "RoleCondition")
            .build()]);
        assert!(matches!(
            engine.load_addin("security"),
            Err(EngineError::TypeResolution { .. })
        ));
    }

    #[test]
    fn test_initial_properties_come_from_config() {
        let mut config = trellis_core::EngineConfig::default();
        config.properties.insert(
            "Mode".into(),
            trellis_core::types::PropertyValue::String("edit".into()),
        );
        let engine = engine_with_config(
            vec![
                AddinBuilder::host("host", COMMANDS).build(),
                AddinBuilder::new("tools")
                    .extends(COMMANDS, vec![conditional_node("edit", "Mode == 'edit'")])
                    .build(),
            ],
            Arc::new(StaticModuleLoader::new()),
            config,
        );

        assert_eq!(child_ids(&engine, COMMANDS), vec!["edit"]);
    }
}

#[cfg(test)]
mod child_context_tests {
    use super::*;

    #[test]
    fn test_child_property_does_not_leak_to_parent() {
        let engine = mode_engine();
        let child = engine.create_extension_context().unwrap();

        child.set_property("Mode", "edit").unwrap();

        assert_eq!(context_ids(&child, COMMANDS), vec!["edit", "always"]);
        assert_eq!(child_ids(&engine, COMMANDS), vec!["always"]);
    }

    #[test]
    fn test_child_inherits_parent_property_unless_overridden() {
        let engine = mode_engine();
        let child = engine.create_extension_context().unwrap();
        let recorder = NodeEventRecorder::new();
        recorder.attach(&child, COMMANDS);
        recorder.clear();

        engine.context().set_property("Mode", "edit").unwrap();
        assert_eq!(context_ids(&child, COMMANDS), vec!["edit", "always"]);
        assert_eq!(recorder.added(), vec!["edit"]);

        child.set_property("Mode", "edit").unwrap();
        engine.context().set_property("Mode", "view").unwrap();
        assert_eq!(context_ids(&child, COMMANDS), vec!["edit", "always"]);
        assert!(recorder.removed().is_empty());
    }

    #[test]
    fn test_child_condition_override() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(COMMANDS, vec![conditional_node("gated", "IsOn()")])
                .build(),
        ]);
        let child = engine.create_extension_context().unwrap();
        engine
            .context()
            .register_condition("IsOn", |_: &ConditionArgs| -> anyhow::Result<bool> { Ok(false) })
            .unwrap();
        child
            .register_condition("IsOn", |_: &ConditionArgs| -> anyhow::Result<bool> { Ok(true) })
            .unwrap();

        assert!(child_ids(&engine, COMMANDS).is_empty());
        assert_eq!(context_ids(&child, COMMANDS), vec!["gated"]);

        child.unregister_condition("IsOn").unwrap();
        assert!(context_ids(&child, COMMANDS).is_empty());
    }

    #[test]
    fn test_child_sees_addins_loaded_later() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("late")
                .disabled()
                .extends(COMMANDS, vec![node("late-node")])
                .build(),
        ]);
        let child = engine.create_extension_context().unwrap();
        let recorder = NodeEventRecorder::new();
        recorder.attach(&child, COMMANDS);

        engine.enable_addin("late").unwrap();
        assert_eq!(context_ids(&child, COMMANDS), vec!["late-node"]);
        assert_eq!(recorder.added(), vec!["late-node"]);

        engine.disable_addin("late").unwrap();
        assert!(context_ids(&child, COMMANDS).is_empty());
        assert_eq!(recorder.removed(), vec!["late-node"]);
    }

    #[test]
    fn test_closed_context_rejects_operations() {
        let engine = mode_engine();
        let child = engine.create_extension_context().unwrap();
        assert!(child.parent().is_some());

        child.close();

        assert!(child.is_closed());
        assert!(child.get_extension_node(COMMANDS).is_none());
        assert!(matches!(
            child.set_property("Mode", "edit"),
            Err(EngineError::ContextClosed)
        ));
        assert!(matches!(
            child.create_child_context(),
            Err(EngineError::ContextClosed)
        ));
    }
}
