//! The node-class library: a hierarchical, weakly-held registry of shelves.
//!
//! Node classes are referenced weakly inside the library so that dropping
//! every strong handle (e.g. unloading a plugin) makes the class vanish from
//! serialization and lookups without any explicit deregistration step.
//! Public snapshots (`shelves()`, `full_serialize()`) always hand back a
//! live, strong-reference view.

use crate::error::LibraryError;
use crate::event::EventEmitter;
use crate::node::{Node, NodeSpec};
use funcnodes_ids::NodeUuid;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// A static descriptor for a kind of node: how to build instances of it, not
/// an instance itself.
pub struct NodeClass {
    pub node_id: String,
    pub node_name: String,
    pub description: String,
    factory: Arc<dyn Fn(Option<NodeUuid>) -> Arc<Node> + Send + Sync>,
}

impl NodeClass {
    /// Builds a class descriptor around a factory that produces ready-made
    /// [`Node`] instances, typically `Node::build` applied to a fixed
    /// [`NodeSpec`] template. The factory receives `Some(uuid)` when a node
    /// is being reconstituted from a serialized node space, `None` for a
    /// fresh instance.
    #[must_use]
    pub fn new<F>(node_id: impl Into<String>, node_name: impl Into<String>, factory: F) -> Arc<Self>
    where
        F: Fn(Option<NodeUuid>) -> Arc<Node> + Send + Sync + 'static,
    {
        Arc::new(Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            description: String::new(),
            factory: Arc::new(factory),
        })
    }

    /// Builds a class descriptor directly from a reusable [`NodeSpec`]
    /// template, cloning what's needed for each new instance.
    #[must_use]
    pub fn from_spec_template<F>(node_id: impl Into<String>, node_name: impl Into<String>, make_spec: F) -> Arc<Self>
    where
        F: Fn() -> NodeSpec + Send + Sync + 'static,
    {
        Self::new(node_id, node_name, move |uuid| {
            let mut spec = make_spec();
            spec.uuid = uuid;
            Node::build(spec)
        })
    }

    /// Instantiates a new, independent node from this class, with a fresh
    /// uuid.
    #[must_use]
    pub fn instantiate(&self) -> Arc<Node> {
        (self.factory)(None)
    }

    /// Instantiates a node forcing a specific uuid, used when reconstituting
    /// a node from a serialized node space.
    #[must_use]
    pub fn instantiate_with_uuid(&self, uuid: NodeUuid) -> Arc<Node> {
        (self.factory)(Some(uuid))
    }
}

/// A named, recursive grouping of node classes, as handed to and returned
/// from the library. Shelves may nest arbitrarily.
#[derive(Clone)]
pub struct Shelf {
    pub name: String,
    pub description: String,
    pub nodes: Vec<Arc<NodeClass>>,
    pub subshelves: Vec<Shelf>,
}

impl Shelf {
    /// Creates an empty, named shelf.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            subshelves: Vec::new(),
        }
    }

    fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.node_id.as_str()).collect()
    }
}

impl PartialEq for Shelf {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.node_ids() == other.node_ids()
            && self.subshelves == other.subshelves
    }
}

/// The weakly-held internal representation of a shelf kept inside the
/// library's registry.
struct InnerShelf {
    name: String,
    description: String,
    nodes_ref: Vec<Weak<NodeClass>>,
    subshelves: Vec<InnerShelf>,
}

impl InnerShelf {
    fn from_shelf(shelf: &Shelf) -> Self {
        Self {
            name: shelf.name.clone(),
            description: shelf.description.clone(),
            nodes_ref: shelf.nodes.iter().map(Arc::downgrade).collect(),
            subshelves: shelf.subshelves.iter().map(Self::from_shelf).collect(),
        }
    }

    fn live_nodes(&self) -> Vec<Arc<NodeClass>> {
        self.nodes_ref.iter().filter_map(Weak::upgrade).collect()
    }

    fn to_shelf(&self) -> Shelf {
        Shelf {
            name: self.name.clone(),
            description: self.description.clone(),
            nodes: self.live_nodes(),
            subshelves: self.subshelves.iter().map(Self::to_shelf).collect(),
        }
    }

    fn add_node(&mut self, class: Arc<NodeClass>) {
        if let Some(existing) = self
            .nodes_ref
            .iter_mut()
            .find(|w| w.upgrade().is_some_and(|c| c.node_id == class.node_id))
        {
            *existing = Arc::downgrade(&class);
        } else {
            self.nodes_ref.push(Arc::downgrade(&class));
        }
    }

    fn find_nodeid(&self, node_id: &str, all: bool, prefix: &[String]) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        let mut here = prefix.to_vec();
        here.push(self.name.clone());

        if self.live_nodes().iter().any(|n| n.node_id == node_id) {
            paths.push(here.clone());
            if !all {
                return paths;
            }
        }
        for sub in &self.subshelves {
            let sub_paths = sub.find_nodeid(node_id, all, &here);
            if !sub_paths.is_empty() {
                paths.extend(sub_paths);
                if !all {
                    break;
                }
            }
        }
        paths
    }
}

/// The top-level node-class registry: an ordered list of shelves plus a set
/// of module dependency names retained for reproducibility.
pub struct Library {
    shelves: RwLock<Vec<InnerShelf>>,
    dependencies: RwLock<std::collections::BTreeSet<String>>,
    events: EventEmitter,
}

impl Library {
    /// Builds an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shelves: RwLock::new(Vec::new()),
            dependencies: RwLock::new(std::collections::BTreeSet::new()),
            events: EventEmitter::new(),
        }
    }

    /// Records a module name this library's node classes depend on.
    pub async fn add_dependency(&self, module: impl Into<String>) {
        self.dependencies.write().await.insert(module.into());
    }

    /// A live, strong-reference snapshot of every top-level shelf.
    pub async fn shelves(&self) -> Vec<Shelf> {
        self.shelves.read().await.iter().map(InnerShelf::to_shelf).collect()
    }

    /// Registers a shelf at the top level. Idempotent when an identical
    /// shelf of the same name already exists; fails when a *different*
    /// shelf shares the name.
    pub async fn add_shelf(&self, shelf: Shelf) -> Result<(), LibraryError> {
        let mut shelves = self.shelves.write().await;
        if let Some(existing) = shelves.iter().find(|s| s.name == shelf.name) {
            if existing.to_shelf() != shelf {
                return Err(LibraryError::Shelf {
                    reason: format!("shelf with name '{}' already exists", shelf.name),
                });
            }
            return Ok(());
        }
        shelves.push(InnerShelf::from_shelf(&shelf));
        drop(shelves);
        self.events
            .emit_after("add_shelf", serde_json::json!({ "name": shelf.name }))
            .await;
        Ok(())
    }

    /// Adds node classes at `path`, creating intermediate shelves as needed.
    /// Within the target shelf, updates by `node_id` if already present,
    /// otherwise appends.
    pub async fn add_nodes(
        &self,
        classes: Vec<Arc<NodeClass>>,
        path: &[String],
    ) -> Result<(), LibraryError> {
        if path.is_empty() {
            return Err(LibraryError::Shelf {
                reason: "shelf path must not be empty".to_string(),
            });
        }
        let mut shelves = self.shelves.write().await;
        let mut current = &mut *shelves;
        let last = path.len() - 1;
        for (i, segment) in path.iter().enumerate() {
            let idx = match current.iter().position(|s| &s.name == segment) {
                Some(idx) => idx,
                None => {
                    current.push(InnerShelf {
                        name: segment.clone(),
                        description: String::new(),
                        nodes_ref: Vec::new(),
                        subshelves: Vec::new(),
                    });
                    current.len() - 1
                }
            };
            if i == last {
                let target = &mut current[idx];
                for class in classes {
                    target.add_node(class);
                }
                break;
            }
            current = &mut current[idx].subshelves;
        }
        drop(shelves);
        self.events
            .emit_after("add_nodes", serde_json::json!({ "path": path }))
            .await;
        Ok(())
    }

    /// Convenience for registering a single node class.
    pub async fn add_node(&self, class: Arc<NodeClass>, path: &[String]) -> Result<(), LibraryError> {
        self.add_nodes(vec![class], path).await
    }

    /// Depth-first search for every shelf path leading to `node_id`.
    pub async fn find_nodeid(&self, node_id: &str, all: bool) -> Vec<Vec<String>> {
        let shelves = self.shelves.read().await;
        let mut paths = Vec::new();
        for shelf in shelves.iter() {
            let found = shelf.find_nodeid(node_id, all, &[]);
            if !found.is_empty() {
                paths.extend(found);
                if !all {
                    break;
                }
            }
        }
        paths
    }

    /// The first registered class matching `node_id`.
    pub async fn get_node_by_id(&self, node_id: &str) -> Result<Arc<NodeClass>, LibraryError> {
        let paths = self.find_nodeid(node_id, false).await;
        if paths.is_empty() {
            return Err(LibraryError::NodeClassNotFound {
                node_id: node_id.to_string(),
            });
        }
        let shelves = self.shelves().await;
        find_class_along_path(&shelves, &paths[0], node_id).ok_or_else(|| {
            LibraryError::NodeClassNotFound {
                node_id: node_id.to_string(),
            }
        })
    }

    /// A versioned, fully-materialized JSON snapshot of every shelf.
    pub async fn full_serialize(&self) -> LibraryJson {
        LibraryJson {
            shelves: self.shelves().await.iter().map(ShelfJson::from).collect(),
        }
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

fn find_class_along_path(shelves: &[Shelf], path: &[String], node_id: &str) -> Option<Arc<NodeClass>> {
    let (first, rest) = path.split_first()?;
    let shelf = shelves.iter().find(|s| &s.name == first)?;
    if rest.is_empty() {
        return shelf.nodes.iter().find(|n| n.node_id == node_id).cloned();
    }
    find_class_along_path(&shelf.subshelves, rest, node_id)
}

/// The wire form of a [`Shelf`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfJson {
    pub name: String,
    pub description: String,
    pub nodes: Vec<NodeClassJson>,
    pub subshelves: Vec<ShelfJson>,
}

impl From<&Shelf> for ShelfJson {
    fn from(shelf: &Shelf) -> Self {
        Self {
            name: shelf.name.clone(),
            description: shelf.description.clone(),
            nodes: shelf.nodes.iter().map(|n| NodeClassJson {
                node_id: n.node_id.clone(),
                node_name: n.node_name.clone(),
                description: n.description.clone(),
            }).collect(),
            subshelves: shelf.subshelves.iter().map(ShelfJson::from).collect(),
        }
    }
}

/// The wire form of a [`NodeClass`] descriptor (no factory, obviously).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeClassJson {
    pub node_id: String,
    pub node_name: String,
    pub description: String,
}

/// The wire form of the whole [`Library`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryJson {
    pub shelves: Vec<ShelfJson>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoSpec;
    use crate::node::{EvaluationOutput, Evaluator};
    use crate::types::TypeRegistry;

    fn double_class() -> Arc<NodeClass> {
        NodeClass::from_spec_template("double", "Double", || NodeSpec {
            uuid: None,
            node_id: "double".into(),
            node_name: "Double".into(),
            description: String::new(),
            inputs: vec![("x".into(), IoSpec { type_key: "int".into(), required: true, ..Default::default() })],
            outputs: vec![("out".into(), IoSpec { type_key: "int".into(), ..Default::default() })],
            evaluator: Evaluator::Sync(Arc::new(|bag| {
                let x = bag["x"].as_json().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(EvaluationOutput::Single(serde_json::json!(x * 2)))
            })),
            registry: TypeRegistry::with_defaults(),
            runner: None,
        })
    }

    #[tokio::test]
    async fn registers_and_finds_a_node_class() {
        let lib = Library::new();
        lib.add_node(double_class(), &["math".to_string()]).await.unwrap();
        let paths = lib.find_nodeid("double", true).await;
        assert_eq!(paths, vec![vec!["math".to_string()]]);
        let found = lib.get_node_by_id("double").await.unwrap();
        assert_eq!(found.node_id, "double");
    }

    #[tokio::test]
    async fn unknown_node_id_errors() {
        let lib = Library::new();
        let result = lib.get_node_by_id("nope").await;
        assert!(matches!(result, Err(LibraryError::NodeClassNotFound { .. })));
    }

    #[tokio::test]
    async fn dropping_strong_refs_prunes_from_serialization() {
        let lib = Library::new();
        let class = double_class();
        lib.add_node(class.clone(), &["math".to_string()]).await.unwrap();

        let before = lib.full_serialize().await;
        assert_eq!(before.shelves[0].nodes.len(), 1);

        drop(class);

        let after = lib.full_serialize().await;
        assert_eq!(after.shelves[0].nodes.len(), 0);
    }

    #[tokio::test]
    async fn add_nodes_creates_nested_shelves() {
        let lib = Library::new();
        lib.add_node(double_class(), &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let shelves = lib.shelves().await;
        assert_eq!(shelves[0].name, "a");
        assert_eq!(shelves[0].subshelves[0].name, "b");
        assert_eq!(shelves[0].subshelves[0].nodes.len(), 1);
    }
}
