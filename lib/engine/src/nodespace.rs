//! The live graph container: an ordered set of node instances, the edges
//! derived from their IO connections, shared properties, and a library
//! reference for instantiation and serialization.

use crate::error::{ConnectionError, IoError, LibraryError};
use crate::event::EventEmitter;
use crate::io;
use crate::library::{Library, LibraryJson};
use crate::node::Node;
use funcnodes_ids::{IoUuid, NodeUuid};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// The current wire-format major version produced by [`NodeSpace::serialize`].
pub const SERIALIZATION_VERSION: u32 = 1;

struct IoOwner {
    node: NodeUuid,
    name: String,
}

/// A live graph instance: nodes, their derived edges, and shared properties.
pub struct NodeSpace {
    library: Arc<Library>,
    nodes: RwLock<IndexMap<NodeUuid, Arc<Node>>>,
    io_owners: RwLock<std::collections::HashMap<IoUuid, IoOwner>>,
    properties: RwLock<JsonValue>,
    events: EventEmitter,
}

impl NodeSpace {
    /// Builds an empty node space backed by `library` for class lookups.
    #[must_use]
    pub fn new(library: Arc<Library>) -> Self {
        Self {
            library,
            nodes: RwLock::new(IndexMap::new()),
            io_owners: RwLock::new(std::collections::HashMap::new()),
            properties: RwLock::new(JsonValue::Object(serde_json::Map::new())),
            events: EventEmitter::new(),
        }
    }

    async fn track_ios(&self, node: &Arc<Node>) {
        let mut owners = self.io_owners.write().await;
        for (name, io) in node.inputs() {
            owners.insert(
                io.uuid,
                IoOwner {
                    node: node.uuid,
                    name: name.clone(),
                },
            );
        }
        for (name, io) in node.outputs() {
            owners.insert(
                io.uuid,
                IoOwner {
                    node: node.uuid,
                    name: name.clone(),
                },
            );
        }
    }

    /// Instantiates a node class from the library by id and adds it.
    pub async fn add_node_by_class(&self, node_id: &str) -> Result<Arc<Node>, LibraryError> {
        let class = self.library.get_node_by_id(node_id).await?;
        let node = class.instantiate();
        self.add_node_instance(node.clone()).await;
        Ok(node)
    }

    /// Adds an already-built node instance to the space.
    pub async fn add_node_instance(&self, node: Arc<Node>) {
        self.track_ios(&node).await;
        self.nodes.write().await.insert(node.uuid, node.clone());
        self.events
            .emit_after("add_node", serde_json::json!({ "uuid": node.uuid.to_string() }))
            .await;
    }

    /// Removes a node: disconnects every one of its IOs, cancels any
    /// pending evaluation, drops it, and emits `after_remove_node`.
    pub async fn remove_node(&self, uuid: NodeUuid) {
        let node = self.nodes.write().await.shift_remove(&uuid);
        let Some(node) = node else { return };
        node.cancel().await;
        for (_, input) in node.inputs() {
            if let Some(source_uuid) = input.connection_uuids().await.first().copied() {
                if let Some(source) = self.find_io(source_uuid).await {
                    io::disconnect(&source, input).await;
                }
            }
        }
        for (_, output) in node.outputs() {
            for target_uuid in output.connection_uuids().await {
                if let Some(target) = self.find_io(target_uuid).await {
                    io::disconnect(output, &target).await;
                }
            }
        }
        let mut owners = self.io_owners.write().await;
        for io in node.inputs().values().chain(node.outputs().values()) {
            owners.remove(&io.uuid);
        }
        drop(owners);
        self.events
            .emit_after("remove_node", serde_json::json!({ "uuid": uuid.to_string() }))
            .await;
    }

    async fn find_io(&self, io_uuid: IoUuid) -> Option<Arc<crate::io::NodeIo>> {
        let owners = self.io_owners.read().await;
        let owner = owners.get(&io_uuid)?;
        let nodes = self.nodes.read().await;
        let node = nodes.get(&owner.node)?;
        node.input(&owner.name)
            .or_else(|| node.output(&owner.name))
            .cloned()
    }

    /// Connects `src_node.src_output` to `dst_node.dst_input`. A no-op if
    /// the same connection already exists.
    pub async fn connect(
        &self,
        src_node: NodeUuid,
        src_output: &str,
        dst_node: NodeUuid,
        dst_input: &str,
    ) -> Result<(), ConnectionError> {
        let nodes = self.nodes.read().await;
        let src = nodes
            .get(&src_node)
            .and_then(|n| n.output(src_output))
            .ok_or_else(|| {
                ConnectionError::Io(IoError::NotFound {
                    name: src_output.to_string(),
                })
            })?
            .clone();
        let dst = nodes
            .get(&dst_node)
            .and_then(|n| n.input(dst_input))
            .ok_or_else(|| {
                ConnectionError::Io(IoError::NotFound {
                    name: dst_input.to_string(),
                })
            })?
            .clone();
        drop(nodes);

        if dst.connection_uuids().await.first() == Some(&src.uuid) {
            return Ok(());
        }
        io::connect(&src, &dst).await
    }

    /// Requests a trigger on every node with no connected input — the
    /// graph's sources. Downstream nodes are triggered by propagation.
    pub async fn trigger_all(&self) {
        let nodes = self.nodes.read().await;
        for node in nodes.values() {
            let mut has_source = false;
            for (_, input) in node.inputs() {
                if !input.connection_uuids().await.is_empty() {
                    has_source = true;
                    break;
                }
            }
            if !has_source {
                node.request_trigger();
            }
        }
    }

    /// The node space's free-form property bag.
    pub async fn properties(&self) -> JsonValue {
        self.properties.read().await.clone()
    }

    /// Replaces the node space's property bag.
    pub async fn set_properties(&self, value: JsonValue) {
        *self.properties.write().await = value;
    }

    /// A node by uuid.
    pub async fn node(&self, uuid: NodeUuid) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&uuid).cloned()
    }

    /// Every node, in insertion order.
    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// The library backing this node space.
    #[must_use]
    pub fn library(&self) -> Arc<Library> {
        self.library.clone()
    }

    /// Builds the canonical serialized form: nodes (in insertion order),
    /// edges derived from IO connections, properties, and the library's
    /// full serialization.
    pub async fn serialize(&self) -> FullNodeSpaceJson {
        let nodes = self.nodes.read().await;
        let mut node_jsons = Vec::with_capacity(nodes.len());
        let mut edges = Vec::new();

        for node in nodes.values() {
            let mut ios = IndexMap::new();
            for (name, input) in node.inputs() {
                ios.insert(name.clone(), input.serialize().await);
                if let Some(source_uuid) = input.connection_uuids().await.first().copied() {
                    if let Some(owner) = self.io_owners.read().await.get(&source_uuid) {
                        edges.push(EdgeJson(owner.node, owner.name.clone(), node.uuid, name.clone()));
                    }
                }
            }
            for (name, output) in node.outputs() {
                ios.insert(name.clone(), output.serialize().await);
            }
            node_jsons.push(NodeJson {
                uuid: node.uuid,
                node_id: node.node_id.clone(),
                node_name: node.node_name.clone(),
                ios,
                properties: node.properties().await,
            });
        }

        FullNodeSpaceJson {
            version: SERIALIZATION_VERSION,
            nodes: node_jsons,
            edges,
            properties: self.properties().await,
            lib: self.library.full_serialize().await,
            extra: serde_json::Map::new(),
        }
    }

    /// Reconstitutes a node space from its serialized form: nodes first (in
    /// input order, via the library), then edges — skipping, with a
    /// warning, any edge whose endpoints no longer exist — then property
    /// bags.
    pub async fn deserialize(
        library: Arc<Library>,
        json: FullNodeSpaceJson,
    ) -> Result<Self, LibraryError> {
        if json.version != SERIALIZATION_VERSION {
            return Err(LibraryError::Shelf {
                reason: format!(
                    "unsupported node space version {} (expected {SERIALIZATION_VERSION})",
                    json.version
                ),
            });
        }

        let space = Self::new(library);
        for node_json in &json.nodes {
            let class = space.library.get_node_by_id(&node_json.node_id).await?;
            let node = class.instantiate_with_uuid(node_json.uuid);
            for (name, io_json) in &node_json.ios {
                if let Some(value) = &io_json.value {
                    if let Some(input) = node.input(name) {
                        let _ = input
                            .set_value(crate::types::IoValue::value(value.clone()))
                            .await;
                    } else if let Some(output) = node.output(name) {
                        let _ = output
                            .set_value(crate::types::IoValue::value(value.clone()))
                            .await;
                    }
                }
            }
            node.set_properties(node_json.properties.clone()).await;
            space.add_node_instance(node).await;
        }

        for edge in &json.edges {
            if let Err(err) = space
                .connect(edge.src_node(), edge.src_output(), edge.dst_node(), edge.dst_input())
                .await
            {
                warn!(src_node = ?edge.src_node(), dst_node = ?edge.dst_node(), %err, "skipping edge with missing or incompatible endpoints");
            }
        }

        space.set_properties(json.properties.clone()).await;
        Ok(space)
    }
}

/// The wire form of a single node: its class, IO states, and properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeJson {
    #[serde(rename = "id")]
    pub uuid: NodeUuid,
    pub node_id: String,
    pub node_name: String,
    pub ios: IndexMap<String, crate::io::IoJson>,
    pub properties: JsonValue,
}

/// A directed edge between two IOs belonging to different nodes, serialized
/// as the canonical 4-element array `[src_node, src_output, dst_node,
/// dst_input]` rather than a keyed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeJson(pub NodeUuid, pub String, pub NodeUuid, pub String);

impl EdgeJson {
    #[must_use]
    pub fn src_node(&self) -> NodeUuid {
        self.0
    }

    #[must_use]
    pub fn src_output(&self) -> &str {
        &self.1
    }

    #[must_use]
    pub fn dst_node(&self) -> NodeUuid {
        self.2
    }

    #[must_use]
    pub fn dst_input(&self) -> &str {
        &self.3
    }
}

/// The canonical, versioned serialized form of a whole [`NodeSpace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullNodeSpaceJson {
    pub version: u32,
    pub nodes: Vec<NodeJson>,
    pub edges: Vec<EdgeJson>,
    pub properties: JsonValue,
    pub lib: LibraryJson,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}
