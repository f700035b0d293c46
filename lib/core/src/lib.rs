//! Foundational identifiers and error handling for `funcnodes-core`.
//!
//! This crate provides the strongly-typed IDs and the shared `Result` alias
//! used throughout the node execution engine.

pub mod error;
pub mod ids;

pub use error::Result;
pub use ids::{IoUuid, NodeUuid, ParseIdError};
