//! Error types for the node execution engine.
//!
//! Layered the same way the reference distinguishes exceptions that are
//! raised synchronously to a caller (`connect`, library lookups, shelf
//! registration) from failures that are captured inside the evaluation loop
//! and reported as events instead of propagated.

use funcnodes_ids::{IoUuid, NodeUuid};
use std::fmt;

/// Errors raised directly to the caller of `NodeIo::connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The two IOs are not a valid (Output, Input) pair, or their declared
    /// types have no registered converter between them.
    NodeConnection { reason: String },
    /// The input already has a connected source.
    MultipleConnections { input: IoUuid },
    /// Both IOs belong to the same node.
    SameNodeConnection { node: NodeUuid },
    /// One of the named endpoints doesn't exist on its node.
    Io(IoError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeConnection { reason } => write!(f, "node connection error: {reason}"),
            Self::MultipleConnections { input } => {
                write!(f, "input {input} already has a connected source")
            }
            Self::SameNodeConnection { node } => {
                write!(f, "cannot connect two IOs of the same node ({node})")
            }
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Errors local to a single IO port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// No IO with the given name exists on the node.
    NotFound { name: String },
    /// `set_value` rejected the given value (no converter path to the
    /// port's declared type). Emitted as an event, never propagated.
    ValueRejected { name: String, reason: String },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "io '{name}' not found"),
            Self::ValueRejected { name, reason } => {
                write!(f, "value rejected for io '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for IoError {}

/// Errors surfaced from a node's evaluator.
///
/// Never escapes the trigger loop: it is captured, stored as the node's
/// last error, and emitted as an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTriggerError {
    pub node: NodeUuid,
    pub kind: TriggerErrorKind,
    pub message: String,
}

/// The reason a node's trigger did not produce a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerErrorKind {
    /// A required input was still `NoValue` when the trigger fired.
    MissingInput { input: String },
    /// The evaluator returned an error or panicked.
    EvaluatorFailed,
    /// The evaluator's result shape didn't match the node's declared
    /// outputs (e.g. a single value for a multi-output node).
    MalformedResult,
}

impl fmt::Display for NodeTriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TriggerErrorKind::MissingInput { input } => {
                write!(f, "node {} missing required input '{input}'", self.node)
            }
            TriggerErrorKind::EvaluatorFailed => {
                write!(f, "node {} evaluator failed: {}", self.node, self.message)
            }
            TriggerErrorKind::MalformedResult => {
                write!(
                    f,
                    "node {} produced a malformed result: {}",
                    self.node, self.message
                )
            }
        }
    }
}

impl std::error::Error for NodeTriggerError {}

/// Errors raised by the node-class library (shelves, registry lookups).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    /// A shelf definition was malformed, or conflicted by name with an
    /// existing, structurally different shelf.
    Shelf { reason: String },
    /// No node class with the given id is registered.
    NodeClassNotFound { node_id: String },
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shelf { reason } => write!(f, "shelf error: {reason}"),
            Self::NodeClassNotFound { node_id } => {
                write!(f, "node class not found: {node_id}")
            }
        }
    }
}

impl std::error::Error for LibraryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let input = IoUuid::new();
        let err = ConnectionError::MultipleConnections { input };
        assert!(err.to_string().contains("already has a connected source"));
    }

    #[test]
    fn io_error_display() {
        let err = IoError::NotFound {
            name: "x".to_string(),
        };
        assert!(err.to_string().contains("'x' not found"));
    }

    #[test]
    fn trigger_error_missing_input_display() {
        let err = NodeTriggerError {
            node: NodeUuid::new(),
            kind: TriggerErrorKind::MissingInput {
                input: "y".to_string(),
            },
            message: String::new(),
        };
        assert!(err.to_string().contains("missing required input 'y'"));
    }

    #[test]
    fn library_error_display() {
        let err = LibraryError::NodeClassNotFound {
            node_id: "double".to_string(),
        };
        assert!(err.to_string().contains("double"));
    }
}
