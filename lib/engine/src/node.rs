//! Node instances and the per-node trigger state machine.
//!
//! A [`Node`] owns a set of [`NodeIo`] ports and an [`Evaluator`]. Requesting
//! a trigger schedules (or coalesces into) a single pending evaluation;
//! [`Node::evaluate_once`] gathers inputs, calls the evaluator, and pushes
//! results back through the outputs.

use crate::error::{NodeTriggerError, TriggerErrorKind};
use crate::event::EventEmitter;
use crate::executor::OffThreadRunner;
use crate::io::{IoSpec, NodeIo, TriggerRequester};
use crate::types::{IoValue, TypeRegistry};
use funcnodes_ids::NodeUuid;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// The trigger state machine of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Idle,
    Requested,
    Running,
}

/// A normalized evaluator result: either a bare value (single-output nodes)
/// or a mapping keyed by output name (multi-output nodes).
#[derive(Debug, Clone)]
pub enum EvaluationOutput {
    Single(JsonValue),
    Named(IndexMap<String, JsonValue>),
}

/// The user-supplied computation a node performs.
///
/// Every evaluator is awaited uniformly by the trigger loop: `Sync` wraps a
/// plain closure so it resolves immediately inside the async body, `Async`
/// is already a future, and `Blocking` is dispatched to an
/// [`OffThreadRunner`] so it never blocks the loop.
#[derive(Clone)]
pub enum Evaluator {
    Sync(Arc<dyn Fn(&IndexMap<String, IoValue>) -> Result<EvaluationOutput, String> + Send + Sync>),
    Async(
        Arc<
            dyn Fn(IndexMap<String, IoValue>) -> BoxFuture<'static, Result<EvaluationOutput, String>>
                + Send
                + Sync,
        >,
    ),
    Blocking(Arc<dyn Fn(&IndexMap<String, IoValue>) -> Result<JsonValue, String> + Send + Sync>),
}

/// A live node instance: I/O set, trigger state, and an evaluator.
pub struct Node {
    pub uuid: NodeUuid,
    pub node_id: String,
    pub node_name: String,
    pub description: String,
    inputs: IndexMap<String, Arc<NodeIo>>,
    outputs: IndexMap<String, Arc<NodeIo>>,
    state: Mutex<TriggerState>,
    evaluator: Evaluator,
    events: EventEmitter,
    registry: TypeRegistry,
    runner: Option<Arc<dyn OffThreadRunner>>,
    properties: Mutex<JsonValue>,
    progress: Mutex<JsonValue>,
    last_error: Mutex<Option<NodeTriggerError>>,
    cancelled: AtomicBool,
    self_ref: Mutex<Weak<Node>>,
}

/// Parameters used to construct a [`Node`]; mirrors the shape a
/// [`crate::library::NodeClass`] factory produces.
pub struct NodeSpec {
    pub node_id: String,
    pub node_name: String,
    pub description: String,
    pub inputs: Vec<(String, IoSpec)>,
    pub outputs: Vec<(String, IoSpec)>,
    pub evaluator: Evaluator,
    pub registry: TypeRegistry,
    pub runner: Option<Arc<dyn OffThreadRunner>>,
    /// Forces a specific uuid, used when reconstituting a node from a
    /// serialized node space. `None` generates a fresh one.
    pub uuid: Option<NodeUuid>,
}

impl Node {
    /// Builds a node from a [`NodeSpec`], wiring each IO's trigger callback
    /// back to this node.
    #[must_use]
    pub fn build(spec: NodeSpec) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Node>| {
            let uuid = spec.uuid.unwrap_or_else(NodeUuid::new);
            let trigger: TriggerRequester = {
                let weak = weak.clone();
                Arc::new(move || {
                    if let Some(node) = weak.upgrade() {
                        node.request_trigger();
                    }
                })
            };

            let inputs = spec
                .inputs
                .into_iter()
                .map(|(name, mut io_spec)| {
                    io_spec.name = name.clone();
                    (
                        name,
                        NodeIo::new_input(uuid, spec.registry.clone(), trigger.clone(), io_spec),
                    )
                })
                .collect();
            let outputs = spec
                .outputs
                .into_iter()
                .map(|(name, mut io_spec)| {
                    io_spec.name = name.clone();
                    (
                        name,
                        NodeIo::new_output(uuid, spec.registry.clone(), trigger.clone(), io_spec),
                    )
                })
                .collect();

            Self {
                uuid,
                node_id: spec.node_id,
                node_name: spec.node_name,
                description: spec.description,
                inputs,
                outputs,
                state: Mutex::new(TriggerState::Idle),
                evaluator: spec.evaluator,
                events: EventEmitter::new(),
                registry: spec.registry,
                runner: spec.runner,
                properties: Mutex::new(JsonValue::Object(serde_json::Map::new())),
                progress: Mutex::new(JsonValue::Null),
                last_error: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                self_ref: Mutex::new(weak.clone()),
            }
        })
    }

    /// The node's input port by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Arc<NodeIo>> {
        self.inputs.get(name)
    }

    /// The node's output port by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Arc<NodeIo>> {
        self.outputs.get(name)
    }

    /// All inputs, in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &IndexMap<String, Arc<NodeIo>> {
        &self.inputs
    }

    /// All outputs, in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &IndexMap<String, Arc<NodeIo>> {
        &self.outputs
    }

    /// The current trigger state.
    pub async fn state(&self) -> TriggerState {
        *self.state.lock().await
    }

    /// The last captured evaluator error, if any.
    pub async fn last_error(&self) -> Option<NodeTriggerError> {
        self.last_error.lock().await.clone()
    }

    /// Requests a trigger. From `idle`, starts evaluating immediately. From
    /// `running`, coalesces into a single pending re-evaluation. From
    /// `requested`, a no-op (already coalesced).
    pub fn request_trigger(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            let should_start = {
                let mut state = node.state.lock().await;
                match *state {
                    TriggerState::Idle => {
                        *state = TriggerState::Running;
                        true
                    }
                    TriggerState::Running => {
                        *state = TriggerState::Requested;
                        false
                    }
                    TriggerState::Requested => false,
                }
            };
            if should_start {
                node.run_trigger_loop().await;
            }
        });
    }

    async fn run_trigger_loop(self: &Arc<Self>) {
        loop {
            self.evaluate_once().await;
            let mut state = self.state.lock().await;
            match *state {
                TriggerState::Requested => {
                    *state = TriggerState::Running;
                    drop(state);
                    continue;
                }
                _ => {
                    *state = TriggerState::Idle;
                    break;
                }
            }
        }
    }

    /// Best-effort cancellation: sets a flag observed between evaluation
    /// steps and discards the in-flight result. Off-thread bodies cannot be
    /// interrupted mid-closure; only their result is discarded.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        *self.state.lock().await = TriggerState::Idle;
    }

    /// Runs exactly one evaluation: before_trigger → gather inputs →
    /// evaluate → set outputs → after_trigger. Evaluator failures are
    /// captured as events, never propagated to the caller.
    async fn evaluate_once(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        let payload = serde_json::json!({ "node": self.uuid.to_string() });
        if self.events.emit_before("trigger", payload).await.is_err() {
            return;
        }

        for (name, input) in &self.inputs {
            if input.required().await && input.value().await.is_no_value() {
                let err = NodeTriggerError {
                    node: self.uuid,
                    kind: TriggerErrorKind::MissingInput {
                        input: name.clone(),
                    },
                    message: String::new(),
                };
                debug!(node = %self.uuid, input = %name, "trigger deferred: missing required input");
                *self.last_error.lock().await = Some(err.clone());
                self.events
                    .emit("triggererror", serde_json::json!({ "error": err.to_string() }))
                    .await;
                return;
            }
        }

        let mut bag = IndexMap::new();
        for (name, input) in &self.inputs {
            bag.insert(name.clone(), input.value().await);
        }

        info!(node = %self.uuid, node_id = %self.node_id, "evaluating");
        let started = Instant::now();
        let result = self.invoke_evaluator(bag.clone()).await;
        let duration = started.elapsed();

        if self.cancelled.load(Ordering::SeqCst) {
            debug!(node = %self.uuid, "evaluation cancelled, discarding result");
            return;
        }

        match result {
            Ok(output) => {
                if let Err(err) = self.apply_output(output).await {
                    error!(node = %self.uuid, %err, "evaluator produced a malformed result");
                    *self.last_error.lock().await = Some(err.clone());
                    self.events
                        .emit("error", serde_json::json!({ "error": err.to_string() }))
                        .await;
                    return;
                }
                *self.last_error.lock().await = None;
                self.events
                    .emit_after(
                        "trigger",
                        serde_json::json!({
                            "inputs": bag.keys().collect::<Vec<_>>(),
                            "outputs": self.outputs.keys().collect::<Vec<_>>(),
                            "duration": duration.as_millis() as u64,
                        }),
                    )
                    .await;
            }
            Err(message) => {
                let err = NodeTriggerError {
                    node: self.uuid,
                    kind: TriggerErrorKind::EvaluatorFailed,
                    message,
                };
                error!(node = %self.uuid, %err, "evaluator failed");
                *self.last_error.lock().await = Some(err.clone());
                self.events
                    .emit("error", serde_json::json!({ "error": err.to_string() }))
                    .await;
            }
        }
    }

    async fn invoke_evaluator(
        &self,
        bag: IndexMap<String, IoValue>,
    ) -> Result<EvaluationOutput, String> {
        match &self.evaluator {
            Evaluator::Sync(f) => f(&bag),
            Evaluator::Async(f) => f(bag).await,
            Evaluator::Blocking(f) => {
                let runner = self
                    .runner
                    .clone()
                    .ok_or_else(|| "blocking evaluator has no off-thread runner".to_string())?;
                let f = f.clone();
                let value = runner
                    .submit(Box::new(move || match f(&bag) {
                        Ok(v) => v,
                        Err(e) => serde_json::json!({ "__evaluator_error__": e }),
                    }))
                    .await
                    .map_err(|e| e.to_string())?;
                if let Some(err) = value.get("__evaluator_error__").and_then(|v| v.as_str()) {
                    Err(err.to_string())
                } else {
                    Ok(EvaluationOutput::Single(value))
                }
            }
        }
    }

    async fn apply_output(&self, output: EvaluationOutput) -> Result<(), NodeTriggerError> {
        match output {
            EvaluationOutput::Single(value) => {
                if self.outputs.len() != 1 {
                    return Err(NodeTriggerError {
                        node: self.uuid,
                        kind: TriggerErrorKind::MalformedResult,
                        message: "bare value returned for a multi-output node".to_string(),
                    });
                }
                let (_, out) = self.outputs.iter().next().expect("checked len == 1");
                out.set_value(IoValue::value(value))
                    .await
                    .map_err(|e| NodeTriggerError {
                        node: self.uuid,
                        kind: TriggerErrorKind::MalformedResult,
                        message: e.to_string(),
                    })
            }
            EvaluationOutput::Named(mut values) => {
                for (name, out) in &self.outputs {
                    if let Some(value) = values.shift_remove(name) {
                        out.set_value(IoValue::value(value))
                            .await
                            .map_err(|e| NodeTriggerError {
                                node: self.uuid,
                                kind: TriggerErrorKind::MalformedResult,
                                message: e.to_string(),
                            })?;
                    }
                }
                Ok(())
            }
        }
    }

    /// A weak handle to this node, usable from contexts (like IO trigger
    /// callbacks) that must not keep the node alive by themselves.
    pub async fn downgrade(&self) -> Weak<Node> {
        self.self_ref.lock().await.clone()
    }

    /// The node's free-form property bag.
    pub async fn properties(&self) -> JsonValue {
        self.properties.lock().await.clone()
    }

    /// Replaces the node's property bag.
    pub async fn set_properties(&self, value: JsonValue) {
        *self.properties.lock().await = value;
    }

    /// The node's accumulated progress state (opaque to the engine; a
    /// reporting evaluator may update it during a run).
    pub async fn progress(&self) -> JsonValue {
        self.progress.lock().await.clone()
    }

    /// Updates the node's progress state.
    pub async fn set_progress(&self, value: JsonValue) {
        *self.progress.lock().await = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn double_node() -> Arc<Node> {
        Node::build(NodeSpec {
            uuid: None,
            node_id: "double".into(),
            node_name: "double".into(),
            description: String::new(),
            inputs: vec![(
                "x".into(),
                IoSpec {
                    type_key: "int".into(),
                    required: true,
                    ..Default::default()
                },
            )],
            outputs: vec![(
                "out".into(),
                IoSpec {
                    type_key: "int".into(),
                    ..Default::default()
                },
            )],
            evaluator: Evaluator::Sync(Arc::new(|bag| {
                let x = bag["x"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(EvaluationOutput::Single(serde_json::json!(x * 2)))
            })),
            registry: TypeRegistry::with_defaults(),
            runner: None,
        })
    }

    #[tokio::test]
    async fn triggering_with_missing_required_input_does_not_evaluate() {
        let node = double_node();
        node.request_trigger();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(node.output("out").unwrap().value().await, IoValue::no_value());
        let err = node.last_error().await.expect("should record missing-input error");
        assert!(matches!(err.kind, TriggerErrorKind::MissingInput { .. }));
    }

    #[tokio::test]
    async fn setting_input_evaluates_and_sets_output() {
        let node = double_node();
        node.input("x")
            .unwrap()
            .set_value(IoValue::value(serde_json::json!(3)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            node.output("out").unwrap().value().await,
            IoValue::value(serde_json::json!(6))
        );
        assert_eq!(node.state().await, TriggerState::Idle);
    }

    #[tokio::test]
    async fn coalesces_trigger_requests_while_running() {
        let calls = Arc::new(AtomicBool::new(false));
        let calls2 = calls.clone();
        let node = Node::build(NodeSpec {
            uuid: None,
            node_id: "slow".into(),
            node_name: "slow".into(),
            description: String::new(),
            inputs: vec![(
                "x".into(),
                IoSpec {
                    type_key: "int".into(),
                    required: true,
                    ..Default::default()
                },
            )],
            outputs: vec![(
                "out".into(),
                IoSpec {
                    type_key: "int".into(),
                    ..Default::default()
                },
            )],
            evaluator: Evaluator::Async(Arc::new(move |bag| {
                let calls2 = calls2.clone();
                Box::pin(async move {
                    calls2.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let x = bag["x"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(EvaluationOutput::Single(serde_json::json!(x)))
                })
            })),
            registry: TypeRegistry::with_defaults(),
            runner: None,
        });

        let input = node.input("x").unwrap().clone();
        input
            .set_value(IoValue::value(serde_json::json!(3)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        input
            .set_value(IoValue::value(serde_json::json!(4)))
            .await
            .unwrap();
        input
            .set_value(IoValue::value(serde_json::json!(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            node.output("out").unwrap().value().await,
            IoValue::value(serde_json::json!(5))
        );
        assert_eq!(node.state().await, TriggerState::Idle);
    }
}
