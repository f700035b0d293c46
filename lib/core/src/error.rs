//! Error handling foundation for `funcnodes-core`.
//!
//! This module provides only the `Result` type alias using rootcause.
//! The engine crate defines its own domain-specific error enums (connection,
//! IO-value, trigger, library) for precise matching, and reserves this
//! `Report`-based alias for ambient, layered-context failures such as
//! configuration loading.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
