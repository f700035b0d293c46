//! Node execution engine and graph runtime for funcnodes.
//!
//! This crate provides the core dataflow engine, including:
//!
//! - **Typed I/O**: named input/output ports on a node, with a pluggable
//!   [`types::TypeRegistry`] for logical type compatibility and conversion.
//! - **Nodes**: a per-node trigger state machine that coalesces rapid
//!   re-triggers into a single pending evaluation.
//! - **Library**: a hierarchical, weakly-held registry of node classes.
//! - **NodeSpace**: a live graph of node instances and their derived edges,
//!   with versioned serialization and deserialization.
//! - **Configuration & runtime**: a file-backed configuration with atomic
//!   persistence, and an explicit [`runtime::Runtime`] context in place of
//!   process-wide globals.

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod io;
pub mod library;
pub mod maker;
pub mod node;
pub mod nodespace;
pub mod runtime;
pub mod types;

pub use error::{ConnectionError, IoError, LibraryError, NodeTriggerError, TriggerErrorKind};
pub use event::{EventEmitter, EventVetoed, Handler};
pub use executor::{OffThreadRunner, RunnerError, ThreadRunner};
pub use io::{connect, disconnect, IoDirection, IoJson, IoSpec, NodeIo};
pub use library::{Library, LibraryJson, NodeClass, Shelf};
pub use maker::{IoOptionHook, NodeFunctionSpec, OutputSpec, ParamSpec};
pub use node::{EvaluationOutput, Evaluator, Node, NodeSpec, TriggerState};
pub use nodespace::{EdgeJson, FullNodeSpaceJson, NodeJson, NodeSpace};
pub use runtime::Runtime;
pub use types::{IoValue, TypeRegistry, ANY_TYPE};
