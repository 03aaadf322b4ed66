//! Interface to whatever performs commands against host state.
//!
//! Implementations run only on the host thread, inside the drain loop, and
//! are never required to be `Send`.

use crate::protocol::{Command, Response};
use std::io;
use thiserror::Error;

/// Failures an executor reports for a single command.
///
/// The display text becomes the `message` of the error response.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Object not found")]
    ObjectNotFound,

    #[error("missing parameter '{0}'")]
    MissingParam(&'static str),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("Object '{0}' has no material slots")]
    NoMaterialSlots(String),

    #[error("render failed: {0}")]
    Render(#[from] io::Error),
}

impl ExecutionError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name,
            reason: reason.into(),
        }
    }
}

/// Performs one command synchronously and returns its outcome.
///
/// Must complete within one tick and must not block on I/O beyond bounded
/// local work. Panics are tolerated by the caller but should not be relied on.
pub trait CommandExecutor {
    fn execute(&mut self, command: &Command) -> Result<Response, ExecutionError>;
}

impl<F> CommandExecutor for F
where
    F: FnMut(&Command) -> Result<Response, ExecutionError>,
{
    fn execute(&mut self, command: &Command) -> Result<Response, ExecutionError> {
        self(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ExecutionError::UnknownAction("fly".to_string()).to_string(),
            "Unknown action: fly"
        );
        assert_eq!(ExecutionError::ObjectNotFound.to_string(), "Object not found");
        assert_eq!(
            ExecutionError::MissingParam("object_name").to_string(),
            "missing parameter 'object_name'"
        );
        assert_eq!(
            ExecutionError::invalid("size", "expected a number").to_string(),
            "invalid parameter 'size': expected a number"
        );
    }

    #[test]
    fn test_closure_executor() {
        let mut calls = 0;
        let mut exec = |cmd: &Command| -> Result<Response, ExecutionError> {
            calls += 1;
            Ok(Response::ok(cmd.action.clone()))
        };
        let response = exec.execute(&Command::new("ping")).unwrap();
        assert_eq!(response, Response::ok("ping"));
        assert_eq!(calls, 1);
    }
}
