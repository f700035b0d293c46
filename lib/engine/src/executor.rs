//! Off-thread runner for blocking node evaluators.
//!
//! A minimal two-operation service: `submit` and `shutdown`. The only
//! flavor implemented here is backed by `tokio::task::spawn_blocking`; a
//! "process" flavor would need an IPC boundary this crate treats as an
//! opaque external collaborator and is not implemented.

use async_trait::async_trait;
use std::fmt;

/// Error returned when a blocking evaluator panics or the runner is
/// unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerError {
    pub message: String,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "off-thread runner error: {}", self.message)
    }
}

impl std::error::Error for RunnerError {}

/// A service that runs blocking closures off the async executor's worker
/// threads and returns their result without blocking the caller's await
/// point.
#[async_trait]
pub trait OffThreadRunner: Send + Sync {
    /// Runs `body` off-thread and awaits its result.
    async fn submit(
        &self,
        body: Box<dyn FnOnce() -> serde_json::Value + Send>,
    ) -> Result<serde_json::Value, RunnerError>;

    /// Releases any resources held by the runner. Idempotent.
    async fn shutdown(&self);
}

/// The only implemented flavor: dispatches to
/// `tokio::task::spawn_blocking`. Carries no state of its own — each
/// submission gets its own blocking thread-pool slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRunner;

#[async_trait]
impl OffThreadRunner for ThreadRunner {
    async fn submit(
        &self,
        body: Box<dyn FnOnce() -> serde_json::Value + Send>,
    ) -> Result<serde_json::Value, RunnerError> {
        tokio::task::spawn_blocking(body)
            .await
            .map_err(|join_err| RunnerError {
                message: format!("blocking task panicked: {join_err}"),
            })
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn thread_runner_executes_blocking_body() {
        let runner = ThreadRunner;
        let result = runner
            .submit(Box::new(|| serde_json::json!(42)))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn thread_runner_surfaces_panics_as_runner_error() {
        let runner = ThreadRunner;
        let result = runner
            .submit(Box::new(|| panic!("boom")))
            .await;
        assert!(result.is_err());
    }
}
