//! The explicit `Runtime` context that replaces the reference
//! implementation's process-wide globals (`CONFIG`, `REGISTERED_NODES`,
//! `IN_NODE_TEST`).
//!
//! A default, lazily-initialized process-wide instance is reachable via
//! [`Runtime::global`] for callers that don't need isolation; tests
//! construct their own via [`Runtime::for_test`].

use crate::config::{base_config_dir, load_config, test_config_dir, Configuration};
use crate::error::LibraryError;
use crate::library::NodeClass;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// A process-wide-by-default registry of node classes plus a loaded
/// configuration, scoped so multiple isolated runtimes (one per test) can
/// coexist.
pub struct Runtime {
    registered_nodes: RwLock<HashMap<String, Arc<NodeClass>>>,
    config: RwLock<Configuration>,
    config_dir: RwLock<std::path::PathBuf>,
    in_test: AtomicBool,
}

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

impl Runtime {
    /// Loads the configuration at `config_dir`, then rebases and reloads
    /// from `custom_config_dir` if the loaded configuration names one,
    /// matching `check_config_dir`'s behavior in the reference.
    fn new(config_dir: std::path::PathBuf) -> Self {
        let config = load_config(&config_dir);
        let (config, config_dir) = match &config.custom_config_dir {
            Some(custom_dir) => {
                let custom_dir = std::path::PathBuf::from(custom_dir);
                (load_config(&custom_dir), custom_dir)
            }
            None => (config, config_dir),
        };
        Self {
            registered_nodes: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            config_dir: RwLock::new(config_dir),
            in_test: AtomicBool::new(false),
        }
    }

    /// The single, lazily-initialized process-wide runtime.
    #[must_use]
    pub fn global() -> Arc<Runtime> {
        GLOBAL
            .get_or_init(|| Arc::new(Runtime::new(base_config_dir())))
            .clone()
    }

    /// Builds an isolated runtime with its configuration rebased under the
    /// OS temp dir, for use as a test fixture. Does not touch
    /// [`Runtime::global`].
    #[must_use]
    pub fn for_test() -> Arc<Runtime> {
        let dir = test_config_dir(true);
        let runtime = Runtime::new(dir);
        runtime.in_test.store(true, Ordering::SeqCst);
        Arc::new(runtime)
    }

    /// Registers a node class by id. Registering a different class under an
    /// id that's already taken fails; re-registering the identical id with
    /// the same underlying class (by pointer) is a no-op.
    pub fn register_node_class(&self, class: Arc<NodeClass>) -> Result<(), LibraryError> {
        let mut nodes = self.registered_nodes.write().expect("runtime lock poisoned");
        if let Some(existing) = nodes.get(&class.node_id) {
            if !Arc::ptr_eq(existing, &class) {
                return Err(LibraryError::Shelf {
                    reason: format!(
                        "node class '{}' already registered with a different class",
                        class.node_id
                    ),
                });
            }
            return Ok(());
        }
        nodes.insert(class.node_id.clone(), class);
        Ok(())
    }

    /// Removes a node class registration, for test teardown.
    pub fn unregister_node_class(&self, node_id: &str) {
        self.registered_nodes
            .write()
            .expect("runtime lock poisoned")
            .remove(node_id);
    }

    /// Looks up a registered node class by id.
    #[must_use]
    pub fn get_registered_node(&self, node_id: &str) -> Option<Arc<NodeClass>> {
        self.registered_nodes
            .read()
            .expect("runtime lock poisoned")
            .get(node_id)
            .cloned()
    }

    /// Clears every registered node class. Used by the testing harness
    /// between test cases.
    pub fn clear_registered_nodes(&self) {
        self.registered_nodes
            .write()
            .expect("runtime lock poisoned")
            .clear();
    }

    /// A snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> Configuration {
        self.config.read().expect("runtime lock poisoned").clone()
    }

    /// The directory the current configuration was loaded from.
    #[must_use]
    pub fn config_dir(&self) -> std::path::PathBuf {
        self.config_dir.read().expect("runtime lock poisoned").clone()
    }

    /// True if this runtime was constructed via [`Runtime::for_test`].
    #[must_use]
    pub fn is_in_test(&self) -> bool {
        self.in_test.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{EvaluationOutput, Evaluator, NodeSpec};
    use crate::types::TypeRegistry;

    fn dummy_class(id: &str) -> Arc<NodeClass> {
        let id = id.to_string();
        NodeClass::from_spec_template(id.clone(), id.clone(), move || NodeSpec {
            uuid: None,
            node_id: id.clone(),
            node_name: id.clone(),
            description: String::new(),
            inputs: vec![],
            outputs: vec![],
            evaluator: Evaluator::Sync(Arc::new(|_| Ok(EvaluationOutput::Named(Default::default())))),
            registry: TypeRegistry::with_defaults(),
            runner: None,
        })
    }

    #[test]
    fn test_runtime_is_isolated_and_marked_in_test() {
        let runtime = Runtime::for_test();
        assert!(runtime.is_in_test());
        assert!(runtime.config_dir().starts_with(std::env::temp_dir()));
    }

    #[test]
    fn duplicate_registration_of_different_class_fails() {
        let runtime = Runtime::for_test();
        runtime.register_node_class(dummy_class("a")).unwrap();
        let result = runtime.register_node_class(dummy_class("a"));
        assert!(result.is_err());
    }

    #[test]
    fn clear_registered_nodes_empties_the_map() {
        let runtime = Runtime::for_test();
        runtime.register_node_class(dummy_class("a")).unwrap();
        runtime.clear_registered_nodes();
        assert!(runtime.get_registered_node("a").is_none());
    }
}
