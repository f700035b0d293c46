//! Builds a [`NodeClass`] from a declared function shape.
//!
//! The reference implementation's `@make_node` decorator inspects a
//! function's signature at import time to synthesize ports. Without runtime
//! reflection over arbitrary closures, [`NodeFunctionSpec`] makes that shape
//! explicit: the call site declares parameters and outputs next to the
//! function, and [`NodeFunctionSpec::build`] wires up the same ports and
//! reactive IO-option hooks the decorator would have.

use crate::executor::OffThreadRunner;
use crate::io::IoSpec;
use crate::library::NodeClass;
use crate::node::{Evaluator, Node, NodeSpec};
use crate::types::{IoValue, TypeRegistry};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One function parameter, translated into an input port. An input is
/// `required` exactly when no default is given.
pub struct ParamSpec {
    pub name: String,
    pub type_key: String,
    pub default: Option<JsonValue>,
    pub description: String,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, type_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_key: type_key.into(),
            default: None,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// One declared return value, translated into an output port.
pub struct OutputSpec {
    pub name: String,
    pub type_key: String,
}

impl OutputSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, type_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_key: type_key.into(),
        }
    }
}

/// Reacts to a source IO's `after_set_value` by recomputing a sibling IO's
/// `value_options` — the Rust stand-in for the reference's
/// `update_other_io_options` hook.
pub struct IoOptionHook {
    pub source: String,
    pub target: String,
    pub compute: Arc<dyn Fn(&IoValue) -> JsonValue + Send + Sync>,
}

/// The declared shape of a function-backed node: its parameters, its
/// outputs, the function itself, and any reactive IO-option hooks.
pub struct NodeFunctionSpec {
    pub node_id: String,
    pub node_name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub outputs: Vec<OutputSpec>,
    pub func: Evaluator,
    pub hooks: Vec<IoOptionHook>,
    pub registry: TypeRegistry,
    pub runner: Option<Arc<dyn OffThreadRunner>>,
}

impl NodeFunctionSpec {
    /// Builds a node class whose ports are synthesized from `params`/
    /// `outputs`, with `func` installed as the evaluator unchanged (its
    /// result is normalized by [`Node::apply_output`] exactly as for a
    /// hand-built node) and every declared hook wired up per instance.
    #[must_use]
    pub fn build(self) -> Arc<NodeClass> {
        let node_id = self.node_id;
        let node_name = self.node_name;
        let description = self.description;
        let params = self.params;
        let outputs = self.outputs;
        let func = self.func;
        let hooks = Arc::new(self.hooks);
        let registry = self.registry;
        let runner = self.runner;

        let node_id_for_spec = node_id.clone();
        let node_name_for_spec = node_name.clone();
        NodeClass::new(node_id, node_name, move |uuid| {
            let inputs = params
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        IoSpec {
                            description: p.description.clone(),
                            type_key: p.type_key.clone(),
                            default: p
                                .default
                                .clone()
                                .map(IoValue::value)
                                .unwrap_or_else(IoValue::no_value),
                            required: p.default.is_none(),
                            ..Default::default()
                        },
                    )
                })
                .collect::<Vec<_>>();
            let output_specs = outputs
                .iter()
                .map(|o| {
                    (
                        o.name.clone(),
                        IoSpec {
                            type_key: o.type_key.clone(),
                            ..Default::default()
                        },
                    )
                })
                .collect::<Vec<_>>();

            let node = Node::build(NodeSpec {
                uuid,
                node_id: node_id_for_spec.clone(),
                node_name: node_name_for_spec.clone(),
                description: description.clone(),
                inputs,
                outputs: output_specs,
                evaluator: func.clone(),
                registry: registry.clone(),
                runner: runner.clone(),
            });
            for hook in hooks.iter() {
                attach_hook(&node, hook);
            }
            node
        })
    }
}

fn attach_hook(node: &Arc<Node>, hook: &IoOptionHook) {
    let Some(source) = node.input(&hook.source).or_else(|| node.output(&hook.source)) else {
        return;
    };
    let Some(target) = node
        .input(&hook.target)
        .or_else(|| node.output(&hook.target))
        .cloned()
    else {
        return;
    };
    let compute = hook.compute.clone();
    let source_for_closure = source.clone();
    source.on_event("after_set_value", move |_payload| {
        let target = target.clone();
        let source = source_for_closure.clone();
        let compute = compute.clone();
        Box::pin(async move {
            let value = source.value().await;
            target.set_value_options(compute(&value)).await;
            Ok(())
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::EvaluationOutput;
    use indexmap::IndexMap;

    fn spec() -> NodeFunctionSpec {
        NodeFunctionSpec {
            node_id: "add_one".into(),
            node_name: "Add One".into(),
            description: String::new(),
            params: vec![ParamSpec::new("x", "int")],
            outputs: vec![OutputSpec::new("out", "int")],
            func: Evaluator::Sync(Arc::new(|bag| {
                let x = bag["x"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(EvaluationOutput::Single(serde_json::json!(x + 1)))
            })),
            hooks: Vec::new(),
            registry: TypeRegistry::with_defaults(),
            runner: None,
        }
    }

    #[tokio::test]
    async fn synthesizes_ports_from_declared_shape() {
        let class = spec().build();
        let node = class.instantiate();
        assert!(node.input("x").is_some());
        assert!(node.output("out").is_some());

        node.input("x")
            .unwrap()
            .set_value(IoValue::value(serde_json::json!(4)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            node.output("out").unwrap().value().await,
            IoValue::value(serde_json::json!(5))
        );
    }

    #[tokio::test]
    async fn missing_default_makes_the_input_required() {
        let class = spec().build();
        let node = class.instantiate();
        assert!(node.input("x").unwrap().required().await);
    }

    #[tokio::test]
    async fn default_present_makes_the_input_optional() {
        let mut function_spec = spec();
        function_spec.params = vec![ParamSpec::new("x", "int").with_default(serde_json::json!(0))];
        let class = function_spec.build();
        let node = class.instantiate();
        assert!(!node.input("x").unwrap().required().await);
    }

    #[tokio::test]
    async fn io_option_hook_reacts_to_sibling_value() {
        let mut function_spec = spec();
        function_spec.outputs.push(OutputSpec::new("echo", "int"));
        function_spec.func = Evaluator::Sync(Arc::new(|bag| {
            let x = bag["x"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
            let mut named = IndexMap::new();
            named.insert("out".to_string(), serde_json::json!(x + 1));
            named.insert("echo".to_string(), serde_json::json!(x));
            Ok(EvaluationOutput::Named(named))
        }));
        function_spec.hooks.push(IoOptionHook {
            source: "x".into(),
            target: "echo".into(),
            compute: Arc::new(|value| serde_json::json!({ "last_seen": value.as_json().cloned() })),
        });

        let class = function_spec.build();
        let node = class.instantiate();
        node.input("x")
            .unwrap()
            .set_value(IoValue::value(serde_json::json!(7)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let options = node.output("echo").unwrap().value_options().await;
        assert_eq!(options["last_seen"], serde_json::json!(7));
    }
}
