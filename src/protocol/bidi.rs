//! Newer-dialect (WebDriver BiDi) message types.
//!
//! # Format
//!
//! | Kind | Shape |
//! |------|-------|
//! | Command | `{"id": 1, "method": "browsingContext.navigate", "params": {...}}` |
//! | Success | `{"type": "success", "id": 1, "result": {...}}` |
//! | Error | `{"type": "error", "id": 1, "error": "unknown error", "message": "...", "stacktrace"?: "..."}` |
//! | Event | `{"type": "event", "method": "browsingContext.load", "params": {...}}` |
//!
//! There is no transport-level session envelope; scoping lives inside
//! `params` (`context`, `session`) and is interpreted by the server.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::CallId;

// ============================================================================
// BidiCommand
// ============================================================================

/// A command in the newer dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidiCommand {
    /// Correlation id.
    pub id: CallId,

    /// Method in `module.command` format.
    pub method: String,

    /// Command parameters.
    #[serde(default)]
    pub params: Value,
}

impl BidiCommand {
    /// Creates a command.
    #[inline]
    #[must_use]
    pub fn new(id: CallId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// BidiMessage
// ============================================================================

/// Any message produced by the newer-dialect server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BidiMessage {
    /// Successful command result.
    Success {
        /// Matches the command id.
        id: CallId,
        /// Result payload.
        #[serde(default)]
        result: Value,
    },

    /// Failed command (or a protocol error with no command id).
    Error {
        /// Matches the command id, if the failure belongs to one.
        #[serde(default)]
        id: Option<CallId>,
        /// Error code string, e.g. `no such frame`.
        error: String,
        /// Error message.
        #[serde(default)]
        message: String,
        /// Remote stack trace.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stacktrace: Option<String>,
    },

    /// Event notification.
    Event {
        /// Event method in `module.event` format.
        method: String,
        /// Event parameters.
        #[serde(default)]
        params: Value,
    },
}

impl BidiMessage {
    /// Builds a success message.
    #[inline]
    #[must_use]
    pub fn success(id: CallId, result: Value) -> Self {
        Self::Success { id, result }
    }

    /// Builds an error message for a command.
    #[inline]
    #[must_use]
    pub fn error(id: CallId, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id: Some(id),
            error: error.into(),
            message: message.into(),
            stacktrace: None,
        }
    }

    /// Builds an event message.
    #[inline]
    #[must_use]
    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self::Event {
            method: method.into(),
            params,
        }
    }
}

/// Human-readable error text: code, message and stack trace joined by spaces.
#[must_use]
pub fn error_text(error: &str, message: &str, stacktrace: Option<&str>) -> String {
    let mut text = format!("{error} {message}");
    if let Some(stacktrace) = stacktrace {
        text.push(' ');
        text.push_str(stacktrace);
    }
    text
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let command = BidiCommand::new(CallId::new(5), "session.status", json!({}));
        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value, json!({"id": 5, "method": "session.status", "params": {}}));
    }

    #[test]
    fn test_parse_success() {
        let message: BidiMessage =
            serde_json::from_str(r#"{"type": "success", "id": 2, "result": {"ready": true}}"#)
                .expect("parse");
        assert_eq!(
            message,
            BidiMessage::success(CallId::new(2), json!({"ready": true}))
        );
    }

    #[test]
    fn test_parse_error_with_stacktrace() {
        let message: BidiMessage = serde_json::from_str(
            r#"{"type": "error", "id": 3, "error": "no such frame", "message": "Context not found", "stacktrace": "at x"}"#,
        )
        .expect("parse");

        match message {
            BidiMessage::Error {
                id,
                error,
                message,
                stacktrace,
            } => {
                assert_eq!(id, Some(CallId::new(3)));
                assert_eq!(
                    error_text(&error, &message, stacktrace.as_deref()),
                    "no such frame Context not found at x"
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_event_ignores_extra_fields() {
        let message: BidiMessage = serde_json::from_str(
            r#"{"type": "event", "method": "browsingContext.load", "params": {"context": "C"}, "channel": "x"}"#,
        )
        .expect("parse");
        assert!(matches!(message, BidiMessage::Event { ref method, .. } if method == "browsingContext.load"));
    }
}
