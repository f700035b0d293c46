//! Typed input/output ports on a node.
//!
//! A [`NodeIo`] holds a current [`IoValue`], fires `after_set_value` when it
//! changes, and requests a trigger on its owning node when an input with
//! `does_trigger` set receives a new value. Connections are a directed edge
//! from an Output to an Input, validated and pushed through [`connect`].

use crate::error::{ConnectionError, IoError};
use crate::event::EventEmitter;
use crate::types::{IoValue, TypeRegistry};
use funcnodes_ids::{IoUuid, NodeUuid};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Whether an IO is a node's input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoDirection {
    Input,
    Output,
}

/// A callback that requests a trigger on the IO's owning node. Fire and
/// forget: the node's own trigger-state machine decides whether to start an
/// evaluation immediately or coalesce into a pending one.
pub type TriggerRequester = Arc<dyn Fn() + Send + Sync>;

struct IoState {
    description: String,
    type_key: String,
    value: IoValue,
    default: IoValue,
    hidden: bool,
    value_options: JsonValue,
    render_options: JsonValue,
    does_trigger: bool,
    required: bool,
    /// Output: every connected input, in connection order. Input: unused.
    connections: Vec<Arc<NodeIo>>,
    /// Input: the connected output, if any. Output: unused.
    source: Option<Arc<NodeIo>>,
}

/// A typed, named port on a node.
pub struct NodeIo {
    pub uuid: IoUuid,
    pub name: String,
    pub direction: IoDirection,
    pub owner: NodeUuid,
    registry: TypeRegistry,
    events: EventEmitter,
    trigger: TriggerRequester,
    state: Mutex<IoState>,
}

/// Parameters used to construct a [`NodeIo`]; grouped so `new_input`/
/// `new_output` don't grow an unwieldy positional argument list.
pub struct IoSpec {
    pub name: String,
    pub description: String,
    pub type_key: String,
    pub default: IoValue,
    pub hidden: bool,
    pub value_options: JsonValue,
    pub render_options: JsonValue,
    pub does_trigger: bool,
    pub required: bool,
}

impl Default for IoSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            type_key: crate::types::ANY_TYPE.to_string(),
            default: IoValue::no_value(),
            hidden: false,
            value_options: JsonValue::Object(serde_json::Map::new()),
            render_options: JsonValue::Object(serde_json::Map::new()),
            does_trigger: true,
            required: false,
        }
    }
}

impl NodeIo {
    fn new(
        direction: IoDirection,
        owner: NodeUuid,
        registry: TypeRegistry,
        trigger: TriggerRequester,
        spec: IoSpec,
    ) -> Arc<Self> {
        let value = spec.default.clone();
        Arc::new(Self {
            uuid: IoUuid::new(),
            name: spec.name,
            direction,
            owner,
            registry,
            events: EventEmitter::new(),
            trigger,
            state: Mutex::new(IoState {
                description: spec.description,
                type_key: spec.type_key,
                value,
                default: spec.default,
                hidden: spec.hidden,
                value_options: spec.value_options,
                render_options: spec.render_options,
                does_trigger: spec.does_trigger,
                required: spec.required,
                connections: Vec::new(),
                source: None,
            }),
        })
    }

    /// Creates a new input IO.
    #[must_use]
    pub fn new_input(
        owner: NodeUuid,
        registry: TypeRegistry,
        trigger: TriggerRequester,
        spec: IoSpec,
    ) -> Arc<Self> {
        Self::new(IoDirection::Input, owner, registry, trigger, spec)
    }

    /// Creates a new output IO.
    #[must_use]
    pub fn new_output(
        owner: NodeUuid,
        registry: TypeRegistry,
        trigger: TriggerRequester,
        spec: IoSpec,
    ) -> Arc<Self> {
        Self::new(IoDirection::Output, owner, registry, trigger, spec)
    }

    /// The declared logical type key.
    pub async fn type_key(&self) -> String {
        self.state.lock().await.type_key.clone()
    }

    /// The current value.
    pub async fn value(&self) -> IoValue {
        self.state.lock().await.value.clone()
    }

    /// Whether this input must hold a non-`NoValue` before its node can
    /// evaluate. Meaningless for outputs.
    pub async fn required(&self) -> bool {
        self.state.lock().await.required
    }

    /// Registers a handler for one of this IO's events (e.g.
    /// `after_set_value`), for reactive sibling-option hooks built by
    /// [`crate::maker`].
    pub fn on_event<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(JsonValue) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        self.events.on(event, handler);
    }

    /// Replaces `value_options` wholesale, without touching the value or
    /// firing `after_set_value`. Used by reactive sibling-option hooks.
    pub async fn set_value_options(&self, options: JsonValue) {
        self.state.lock().await.value_options = options;
    }

    /// The current `value_options`.
    pub async fn value_options(&self) -> JsonValue {
        self.state.lock().await.value_options.clone()
    }

    /// The currently connected source (inputs) or fan-out targets
    /// (outputs), as uuids.
    pub async fn connection_uuids(&self) -> Vec<IoUuid> {
        let state = self.state.lock().await;
        match self.direction {
            IoDirection::Output => state.connections.iter().map(|io| io.uuid).collect(),
            IoDirection::Input => state.source.iter().map(|io| io.uuid).collect(),
        }
    }

    /// Applies `new_value` through the type registry, records it if changed,
    /// emits `after_set_value`, requests a trigger on the owning node if
    /// this is a triggering input, and propagates to connected inputs if
    /// this is an output.
    ///
    /// Boxed because propagation recurses into connected inputs'
    /// `set_value`.
    pub fn set_value(
        self: &Arc<Self>,
        new_value: IoValue,
    ) -> Pin<Box<dyn Future<Output = Result<(), IoError>> + Send + '_>> {
        Box::pin(async move {
            let converted = self.convert_incoming(&new_value).await?;

            let (old, does_trigger, is_input, fan_out) = {
                let mut state = self.state.lock().await;
                if converted == state.value {
                    return Ok(());
                }
                let old = state.value.clone();
                state.value = converted.clone();
                let fan_out = if self.direction == IoDirection::Output {
                    state.connections.clone()
                } else {
                    Vec::new()
                };
                (old, state.does_trigger, self.direction == IoDirection::Input, fan_out)
            };

            self.events
                .emit_after(
                    "set_value",
                    serde_json::json!({ "old": old, "new": converted }),
                )
                .await;

            if is_input && does_trigger {
                (self.trigger)();
            }

            for input in fan_out {
                input.set_value(converted.clone()).await?;
            }

            Ok(())
        })
    }

    async fn convert_incoming(&self, new_value: &IoValue) -> Result<IoValue, IoError> {
        if new_value.is_no_value() {
            return Ok(IoValue::no_value());
        }
        let type_key = self.state.lock().await.type_key.clone();
        let json = new_value.as_json().expect("checked not NoValue above");
        match self.registry.convert(json, "any", &type_key) {
            Ok(converted) => Ok(IoValue::value(converted)),
            Err(err) => Err(IoError::ValueRejected {
                name: self.name.clone(),
                reason: err.to_string(),
            }),
        }
    }

    /// Serializable snapshot of this IO, matching the wire format described
    /// for node/space serialization.
    pub async fn serialize(&self) -> IoJson {
        let state = self.state.lock().await;
        let value = if state.value.is_no_value() {
            None
        } else {
            state.value.as_json().cloned()
        };
        IoJson {
            uuid: self.uuid,
            name: self.name.clone(),
            r#type: state.type_key.clone(),
            value,
            default: state.default.as_json().cloned(),
            hidden: state.hidden,
            does_trigger: state.does_trigger,
            required: state.required,
            value_options: state.value_options.clone(),
            render_options: state.render_options.clone(),
        }
    }
}

/// The serialized, wire-stable form of a [`NodeIo`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoJson {
    pub uuid: IoUuid,
    pub name: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    pub hidden: bool,
    pub does_trigger: bool,
    pub required: bool,
    pub value_options: JsonValue,
    pub render_options: JsonValue,
}

/// Connects `output` to `input`, recording the edge and pushing the
/// output's current value if it isn't `NoValue`.
pub async fn connect(output: &Arc<NodeIo>, input: &Arc<NodeIo>) -> Result<(), ConnectionError> {
    if output.direction != IoDirection::Output || input.direction != IoDirection::Input {
        return Err(ConnectionError::NodeConnection {
            reason: "connect requires one Output and one Input".to_string(),
        });
    }
    if output.owner == input.owner {
        return Err(ConnectionError::SameNodeConnection { node: output.owner });
    }

    let from_type = output.type_key().await;
    let to_type = input.type_key().await;
    if !output.registry.is_compatible(&from_type, &to_type) {
        return Err(ConnectionError::NodeConnection {
            reason: format!("no converter from '{from_type}' to '{to_type}'"),
        });
    }

    {
        let mut input_state = input.state.lock().await;
        if input_state.source.is_some() {
            return Err(ConnectionError::MultipleConnections { input: input.uuid });
        }
        input_state.source = Some(output.clone());
    }
    {
        let mut output_state = output.state.lock().await;
        output_state.connections.push(input.clone());
    }

    output
        .events
        .emit_after(
            "connect",
            serde_json::json!({ "output": output.uuid.to_string(), "input": input.uuid.to_string() }),
        )
        .await;

    let current = output.value().await;
    if !current.is_no_value() {
        input
            .set_value(current)
            .await
            .map_err(|err| ConnectionError::NodeConnection {
                reason: err.to_string(),
            })?;
    }

    Ok(())
}

/// Removes the connection between `output` and `input`, if one exists.
pub async fn disconnect(output: &Arc<NodeIo>, input: &Arc<NodeIo>) {
    {
        let mut output_state = output.state.lock().await;
        output_state.connections.retain(|io| io.uuid != input.uuid);
    }
    {
        let mut input_state = input.state.lock().await;
        if input_state
            .source
            .as_ref()
            .is_some_and(|src| src.uuid == output.uuid)
        {
            input_state.source = None;
        }
    }
    output
        .events
        .emit_after(
            "disconnect",
            serde_json::json!({ "output": output.uuid.to_string(), "input": input.uuid.to_string() }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_trigger() -> TriggerRequester {
        Arc::new(|| {})
    }

    #[tokio::test]
    async fn connecting_output_to_input_pushes_current_value() {
        let registry = TypeRegistry::with_defaults();
        let out = NodeIo::new_output(
            NodeUuid::new(),
            registry.clone(),
            no_trigger(),
            IoSpec {
                name: "out".into(),
                type_key: "int".into(),
                ..Default::default()
            },
        );
        let inp = NodeIo::new_input(
            NodeUuid::new(),
            registry,
            no_trigger(),
            IoSpec {
                name: "x".into(),
                type_key: "int".into(),
                ..Default::default()
            },
        );
        out.set_value(IoValue::value(serde_json::json!(3)))
            .await
            .unwrap();
        connect(&out, &inp).await.unwrap();
        assert_eq!(inp.value().await, IoValue::value(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn connecting_two_inputs_fails() {
        let registry = TypeRegistry::with_defaults();
        let a = NodeIo::new_input(
            NodeUuid::new(),
            registry.clone(),
            no_trigger(),
            IoSpec {
                name: "a".into(),
                ..Default::default()
            },
        );
        let b = NodeIo::new_input(
            NodeUuid::new(),
            registry,
            no_trigger(),
            IoSpec {
                name: "b".into(),
                ..Default::default()
            },
        );
        let result = connect(&a, &b).await;
        assert!(matches!(result, Err(ConnectionError::NodeConnection { .. })));
        assert!(a.connection_uuids().await.is_empty());
        assert!(b.connection_uuids().await.is_empty());
    }

    #[tokio::test]
    async fn input_already_sourced_rejects_second_connection() {
        let registry = TypeRegistry::with_defaults();
        let out1 = NodeIo::new_output(
            NodeUuid::new(),
            registry.clone(),
            no_trigger(),
            IoSpec {
                name: "o1".into(),
                ..Default::default()
            },
        );
        let out2 = NodeIo::new_output(
            NodeUuid::new(),
            registry.clone(),
            no_trigger(),
            IoSpec {
                name: "o2".into(),
                ..Default::default()
            },
        );
        let inp = NodeIo::new_input(
            NodeUuid::new(),
            registry,
            no_trigger(),
            IoSpec {
                name: "x".into(),
                ..Default::default()
            },
        );
        connect(&out1, &inp).await.unwrap();
        let result = connect(&out2, &inp).await;
        assert!(matches!(
            result,
            Err(ConnectionError::MultipleConnections { .. })
        ));
    }

    #[tokio::test]
    async fn setting_same_value_does_not_refire_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = TypeRegistry::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));
        let inp = NodeIo::new_input(
            NodeUuid::new(),
            registry,
            no_trigger(),
            IoSpec {
                name: "x".into(),
                type_key: "int".into(),
                ..Default::default()
            },
        );
        let count2 = count.clone();
        inp.events.on("after_set_value", move |_| {
            let count2 = count2.clone();
            Box::pin(async move {
                count2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        inp.set_value(IoValue::value(serde_json::json!(1)))
            .await
            .unwrap();
        inp.set_value(IoValue::value(serde_json::json!(1)))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
