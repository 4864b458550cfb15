//! Add-in loading integration tests
//!
//! Tests the engine's load/unload lifecycle including:
//! - Dependency-ordered loading and cycle detection
//! - Lazy loading of contributors when an extension point is read
//! - Unloading add-ins and their dependents
//! - Runtime enable/disable and shutdown
//! - Module loader failures

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::types::ExtensionDescription;
use trellis_core::EngineConfig;
use trellis_engine::{EngineError, StaticModule, StaticModuleLoader};

#[cfg(test)]
mod query_tests {
    use super::*;

    #[test]
    fn test_contributors_load_on_first_read() {
        let engine = commands_engine(&["tools"]);
        assert_eq!(engine.loaded_addins(), vec!["host"]);

        assert_eq!(child_ids(&engine, COMMANDS), vec!["tools-node"]);
        assert!(engine.is_loaded("tools"));
    }

    #[test]
    fn test_missing_paths_stay_missing() {
        let engine = commands_engine(&["tools"]);

        assert!(engine.get_extension_node("/host/Missing").is_none());
        assert!(engine.get_extension_node("/host/Commands/missing").is_none());
        assert!(engine.get_extension_node("/elsewhere").is_none());
        assert!(engine.get_extension_nodes("/elsewhere").is_empty());

        // Asking again does not conjure anything
        assert!(engine.get_extension_node("/host/Missing").is_none());
    }

    #[test]
    fn test_root_path_lists_top_level_segments() {
        let engine = commands_engine(&[]);
        assert_eq!(child_ids(&engine, "/"), vec!["host"]);
    }

    #[test]
    fn test_node_metadata() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(
                    COMMANDS,
                    vec![node("open")
                        .with_type("Command")
                        .with_attribute("label", "Open...")],
                )
                .build(),
        ]);

        let open = engine.get_extension_node("/host/Commands/open").unwrap();
        assert_eq!(open.path(), "/host/Commands/open");
        assert_eq!(open.addin_id(), Some("tools"));
        assert_eq!(open.node_type(), Some("Command"));
        assert_eq!(open.attribute("label"), Some("Open..."));
        assert!(!open.has_children());

        let commands = engine.get_extension_node(COMMANDS).unwrap();
        assert_eq!(commands.addin_id(), None);
        assert!(commands.child("open").is_some());
    }

    #[test]
    fn test_nested_nodes_and_paths_below_contributions() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("menus")
                .extends(COMMANDS, vec![node("file").with_child(node("open"))])
                .build(),
            AddinBuilder::new("more")
                .extends("/host/Commands/file", vec![node("close")])
                .build(),
        ]);

        assert_eq!(
            child_ids(&engine, "/host/Commands/file"),
            vec!["open", "close"]
        );
    }

    #[test]
    fn test_insert_before_orders_across_addins() {
        let mut first = node("first");
        first.insert_before = Some("tools-node".into());
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(COMMANDS, vec![node("tools-node")])
                .build(),
            AddinBuilder::new("zz")
                .depends_on("tools")
                .extends(COMMANDS, vec![first])
                .build(),
        ]);

        assert_eq!(child_ids(&engine, COMMANDS), vec!["first", "tools-node"]);
    }

    #[test]
    fn test_get_extension_nodes_of_type() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .extends(
                    COMMANDS,
                    vec![node("a").with_type("Command"), node("b").with_type("Separator")],
                )
                .build(),
        ]);

        let err = engine
            .context()
            .get_extension_nodes_of_type(COMMANDS, "Command")
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnexpectedNodeType { ref found, .. } if found == "Separator"
        ));
    }
}

#[cfg(test)]
mod dependency_tests {
    use super::*;

    fn chain() -> Vec<trellis_core::types::AddinDescription> {
        vec![
            AddinBuilder::new("A").depends_on("B").build(),
            AddinBuilder::new("B").depends_on("C").build(),
            AddinBuilder::new("C").build(),
        ]
    }

    #[test]
    fn test_dependencies_load_first() {
        let engine = engine_with(chain());
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        engine.on_addin_loaded(move |event| seen.lock().push(event.addin_id.clone()));

        engine.load_addin("A").unwrap();

        assert_eq!(engine.loaded_addins(), vec!["C", "B", "A"]);
        assert_eq!(*order.lock(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_load_is_idempotent() {
        let engine = engine_with(chain());
        let count = Arc::new(Mutex::new(0));
        let seen = count.clone();
        engine.on_addin_loaded(move |_| *seen.lock() += 1);

        engine.load_addin("A").unwrap();
        engine.load_addin("A").unwrap();
        engine.load_addin("B").unwrap();

        assert_eq!(*count.lock(), 3);
        assert_eq!(engine.loaded_addins().len(), 3);
    }

    #[test]
    fn test_cycle_loads_nothing() {
        let engine = engine_with(vec![
            AddinBuilder::new("A").depends_on("B").build(),
            AddinBuilder::new("B").depends_on("A").build(),
        ]);

        let err = engine.load_addin("A").unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
        assert!(engine.loaded_addins().is_empty());
    }

    #[test]
    fn test_cycle_through_optional_module_loads_nothing() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("A")
                .optional_module(
                    None,
                    &["B"],
                    vec![ExtensionDescription {
                        path: COMMANDS.into(),
                        nodes: vec![node("a-extra")],
                    }],
                )
                .build(),
            AddinBuilder::new("B").depends_on("A").build(),
        ]);

        let err = engine.load_addin("A").unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency { .. }));
        assert_eq!(engine.loaded_addins(), vec!["host"]);
    }

    #[test]
    fn test_missing_dependency_leaves_state_untouched() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("broken")
                .depends_on("nowhere")
                .extends(COMMANDS, vec![node("broken-node")])
                .build(),
        ]);
        let errors = ErrorRecorder::attach(&engine);

        assert!(matches!(
            engine.load_addin("broken"),
            Err(EngineError::MissingDependency { .. })
        ));
        // Reading the extension point reports the failed contributor
        assert!(child_ids(&engine, COMMANDS).is_empty());
        assert!(!engine.is_loaded("broken"));
        assert!(errors.messages().iter().any(|m| m.contains("broken")));
    }

    #[test]
    fn test_version_requirement() {
        let engine = engine_with(vec![
            AddinBuilder::new("app").depends_on_version("lib", "^2").build(),
            AddinBuilder::new("lib").version("1.4.0").build(),
        ]);
        assert!(matches!(
            engine.load_addin("app"),
            Err(EngineError::IncompatibleVersion { .. })
        ));

        let relaxed = EngineConfig {
            check_dependency_versions: false,
            ..EngineConfig::default()
        };
        let engine = engine_with_config(
            vec![
                AddinBuilder::new("app").depends_on_version("lib", "^2").build(),
                AddinBuilder::new("lib").version("1.4.0").build(),
            ],
            Arc::new(StaticModuleLoader::new()),
            relaxed,
        );
        engine.load_addin("app").unwrap();
    }

    #[test]
    fn test_unknown_and_disabled_addins() {
        let engine = engine_with(vec![AddinBuilder::new("off").disabled().build()]);
        assert!(matches!(
            engine.load_addin("nope"),
            Err(EngineError::UnknownAddin { .. })
        ));
        assert!(matches!(
            engine.load_addin("off"),
            Err(EngineError::AddinDisabled { .. })
        ));
    }

    #[test]
    fn test_optional_module_contributes_only_when_resolvable() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .optional_module(
                    None,
                    &["absent"],
                    vec![ExtensionDescription {
                        path: COMMANDS.into(),
                        nodes: vec![node("needs-absent")],
                    }],
                )
                .optional_module(
                    None,
                    &[],
                    vec![ExtensionDescription {
                        path: COMMANDS.into(),
                        nodes: vec![node("always")],
                    }],
                )
                .build(),
        ]);

        assert_eq!(child_ids(&engine, COMMANDS), vec!["always"]);
    }
}

#[cfg(test)]
mod unload_tests {
    use super::*;

    #[test]
    fn test_unload_removes_only_that_addins_nodes() {
        let engine = commands_engine(&["a", "b"]);
        assert_eq!(child_ids(&engine, COMMANDS), vec!["a-node", "b-node"]);

        engine.unload_addin("a").unwrap();

        assert_eq!(child_ids(&engine, COMMANDS), vec!["b-node"]);
        assert!(!engine.is_loaded("a"));
        assert!(engine.is_loaded("host"));
    }

    #[test]
    fn test_unload_keeps_other_anonymous_nodes() {
        let anonymous = || {
            let mut description = node("unused");
            description.id = None;
            description
        };
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("a").extends(COMMANDS, vec![anonymous()]).build(),
            AddinBuilder::new("b").extends(COMMANDS, vec![anonymous()]).build(),
        ]);
        assert_eq!(child_ids(&engine, COMMANDS), vec!["__a_1", "__b_1"]);
        let survivor = engine.get_extension_node("/host/Commands/__b_1").unwrap();

        let recorder = NodeEventRecorder::new();
        recorder.attach(engine.context(), COMMANDS);
        recorder.clear();
        engine.disable_addin("a").unwrap();

        assert_eq!(
            recorder.events(),
            vec![(trellis_engine::NodeChange::Removed, "__a_1".to_string())]
        );
        let after = engine.get_extension_node("/host/Commands/__b_1").unwrap();
        assert!(Arc::ptr_eq(&survivor, &after));
    }

    #[test]
    fn test_disabling_host_removes_extension_point_subtree() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("tools")
                .depends_on("host")
                .extends(COMMANDS, vec![node("open")])
                .build(),
        ]);
        assert_eq!(child_ids(&engine, COMMANDS), vec!["open"]);

        engine.disable_addin("host").unwrap();

        assert!(engine.loaded_addins().is_empty());
        assert!(engine.get_extension_node(COMMANDS).is_none());
        assert!(engine.get_extension_node("/host").is_none());
        assert!(!engine.is_addin_enabled("host"));
    }

    #[test]
    fn test_unload_takes_dependents_down_in_reverse_order() {
        let engine = engine_with(vec![
            AddinBuilder::new("A").depends_on("B").build(),
            AddinBuilder::new("B").depends_on("C").build(),
            AddinBuilder::new("C").build(),
        ]);
        engine.load_addin("A").unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        engine.on_addin_unloaded(move |event| seen.lock().push(event.addin_id.clone()));

        engine.unload_addin("C").unwrap();

        assert!(engine.loaded_addins().is_empty());
        assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_enable_loads_addins_extending_bound_points() {
        let engine = engine_with(vec![
            AddinBuilder::host("host", COMMANDS).build(),
            AddinBuilder::new("late")
                .disabled()
                .extends(COMMANDS, vec![node("late-node")])
                .build(),
        ]);
        assert!(child_ids(&engine, COMMANDS).is_empty());

        engine.enable_addin("late").unwrap();
        assert!(engine.is_loaded("late"));
        assert_eq!(child_ids(&engine, COMMANDS), vec!["late-node"]);

        engine.disable_addin("late").unwrap();
        assert!(child_ids(&engine, COMMANDS).is_empty());
    }

    #[test]
    fn test_shutdown_unloads_everything() {
        let engine = commands_engine(&["tools"]);
        child_ids(&engine, COMMANDS);
        assert_eq!(engine.loaded_addins().len(), 2);

        engine.shutdown();

        assert!(engine.loaded_addins().is_empty());
        assert!(matches!(
            engine.load_addin("tools"),
            Err(EngineError::EngineShutdown)
        ));
    }

    #[test]
    fn test_lifecycle_hooks_run_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let on_load = calls.clone();
        let on_unload = calls.clone();
        let module = StaticModule::new()
            .with_on_load(move |id| {
                on_load.lock().push(format!("load {}", id));
                Ok(())
            })
            .with_on_unload(move |id| {
                on_unload.lock().push(format!("unload {}", id));
                Ok(())
            });
        let loader = StaticModuleLoader::new().with_module("hooks", module);
        let engine = engine_with_loader(
            vec![AddinBuilder::new("hooked").module("hooks").build()],
            Arc::new(loader),
        );

        engine.load_addin("hooked").unwrap();
        engine.load_addin("hooked").unwrap();
        engine.unload_addin("hooked").unwrap();

        assert_eq!(*calls.lock(), vec!["load hooked", "unload hooked"]);
    }
}

#[cfg(test)]
mod module_loader_tests {
    use super::*;

    #[test]
    fn test_module_load_failure_aborts_the_load() {
        let mut loader = MockLoader::new();
        loader
            .expect_load_module()
            .withf(|addin, module| addin.id == "tools" && module.contains("tools.so"))
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("file not found")));

        let engine = engine_with_loader(
            vec![
                AddinBuilder::new("base").build(),
                AddinBuilder::new("tools")
                    .depends_on("base")
                    .module("tools.so")
                    .build(),
            ],
            Arc::new(loader),
        );

        let err = engine.load_addin("tools").unwrap_err();
        assert!(matches!(
            err,
            EngineError::ModuleLoad { ref module, .. } if module == "tools.so"
        ));
        // The dependency was prepared but never activated
        assert!(engine.loaded_addins().is_empty());
    }

    #[test]
    fn test_loader_panic_is_an_error() {
        let engine = engine_with_loader(
            vec![AddinBuilder::new("tools").module("tools.so").build()],
            Arc::new(PanickingLoader),
        );

        let err = engine.load_addin("tools").unwrap_err();
        assert!(err.to_string().contains("loader bug"));
        assert!(!engine.is_loaded("tools"));
    }

    #[test]
    fn test_failed_optional_module_is_reported_and_skipped() {
        let mut loader = MockLoader::new();
        loader
            .expect_load_module()
            .returning(|_, _| Err(anyhow::anyhow!("missing")));

        let engine = engine_with_loader(
            vec![
                AddinBuilder::host("host", COMMANDS).build(),
                AddinBuilder::new("tools")
                    .extends(COMMANDS, vec![node("main")])
                    .optional_module(
                        Some("extra.so"),
                        &[],
                        vec![ExtensionDescription {
                            path: COMMANDS.into(),
                            nodes: vec![node("extra")],
                        }],
                    )
                    .build(),
            ],
            Arc::new(loader),
        );
        let errors = ErrorRecorder::attach(&engine);

        assert_eq!(child_ids(&engine, COMMANDS), vec!["main"]);
        assert!(errors
            .messages()
            .iter()
            .any(|m| m.contains("extra.so")));
    }
}

#[cfg(test)]
mod registry_file_tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;
    use trellis_engine::AddinEngine;

    const REGISTRY: &str = r#"
addins:
  - id: host
    is-root: true
    extension-points:
      - path: /host/Commands
  - id: tools
    main-module:
      extensions:
        - path: /host/Commands
          nodes:
            - id: open
"#;

    fn temp_dir() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("Invalid UTF-8 path");
        (temp, path)
    }

    #[test]
    fn test_engine_from_registry_file() {
        let (_temp, dir) = temp_dir();
        let file = dir.join("registry.yaml");
        fs::write(&file, REGISTRY).unwrap();

        let engine = AddinEngine::from_registry_file(
            &file,
            Arc::new(StaticModuleLoader::new()),
            EngineConfig::default(),
        )
        .unwrap();
        engine.initialize().unwrap();

        assert_eq!(child_ids(&engine, COMMANDS), vec!["open"]);
    }

    #[test]
    fn test_registry_file_errors_surface_as_engine_errors() {
        let (_temp, dir) = temp_dir();
        let missing = AddinEngine::from_registry_file(
            &dir.join("missing.yaml"),
            Arc::new(StaticModuleLoader::new()),
            EngineConfig::default(),
        );
        assert!(matches!(
            missing,
            Err(EngineError::Core(trellis_core::Error::Io(_)))
        ));

        let file = dir.join("registry.yaml");
        fs::write(&file, "addins:\n  - id: host\n    extension-points: [{ path: / }]\n").unwrap();
        let invalid = AddinEngine::from_registry_file(
            &file,
            Arc::new(StaticModuleLoader::new()),
            EngineConfig::default(),
        );
        assert!(matches!(
            invalid,
            Err(EngineError::Core(trellis_core::Error::InvalidRegistry { .. }))
        ));
    }
}
