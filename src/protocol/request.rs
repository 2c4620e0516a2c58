//! Older-dialect (CDP) request and response message types.
//!
//! # Format
//!
//! | Kind | Shape |
//! |------|-------|
//! | Request | `{"id": 1, "method": "Target.attachToTarget", "params": {...}, "sessionId"?: "..."}` |
//! | Success | `{"id": 1, "result": {...}, "sessionId"?: "..."}` |
//! | Error | `{"id": 1, "error": {"code": -32000, "message": "...", "data"?: ...}}` |
//! | Event | `{"method": "Page.frameNavigated", "params": {...}, "sessionId"?: "..."}` |
//!
//! `sessionId`, when present, is the only routing key for per-session delivery.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{CallId, SessionId};

// ============================================================================
// Request
// ============================================================================

/// An outgoing command.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    /// Correlation id.
    pub id: CallId,

    /// Method in `Domain.method` format.
    pub method: &'a str,

    /// Command parameters; omitted from the wire when null.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: &'a Value,

    /// Session the command is addressed to, if any.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a SessionId>,
}

impl<'a> Request<'a> {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(
        id: CallId,
        method: &'a str,
        params: &'a Value,
        session_id: Option<&'a SessionId>,
    ) -> Self {
        Self {
            id,
            method,
            params,
            session_id,
        }
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code.
    #[serde(default)]
    pub code: Option<i64>,

    /// Browser error message.
    #[serde(default)]
    pub message: String,

    /// Additional detail, often a stack-trace-like string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorPayload {
    /// Human-readable message with `data` folded in.
    #[must_use]
    pub fn full_message(&self) -> String {
        match &self.data {
            None | Some(Value::Null) => self.message.clone(),
            Some(Value::String(data)) => format!("{} {}", self.message, data),
            Some(data) => format!("{} {}", self.message, data),
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Any message received from the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct Incoming {
    /// Correlation id, present on responses only.
    #[serde(default)]
    pub id: Option<CallId>,

    /// Event method, present on events only.
    #[serde(default)]
    pub method: Option<String>,

    /// Event parameters.
    #[serde(default)]
    pub params: Value,

    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload.
    #[serde(default)]
    pub error: Option<ErrorPayload>,

    /// Routing key for session-scoped messages.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<SessionId>,
}

/// Classification of an [`Incoming`] message, without its routing key.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingKind {
    /// Successful response.
    Success {
        /// Correlation id.
        id: CallId,
        /// Result payload (null when absent).
        result: Value,
    },
    /// Failed response.
    Failure {
        /// Correlation id.
        id: CallId,
        /// Error payload.
        error: ErrorPayload,
    },
    /// Event notification.
    Event {
        /// Event method.
        method: String,
        /// Event parameters.
        params: Value,
    },
    /// Neither a response nor an event.
    Malformed,
}

impl Incoming {
    /// Splits the message into its routing key and kind.
    #[must_use]
    pub fn into_parts(self) -> (Option<SessionId>, IncomingKind) {
        let kind = match (self.id, self.error, self.method) {
            (Some(id), Some(error), _) => IncomingKind::Failure { id, error },
            (Some(id), None, _) => IncomingKind::Success {
                id,
                result: self.result.unwrap_or(Value::Null),
            },
            (None, _, Some(method)) => IncomingKind::Event {
                method,
                params: self.params,
            },
            (None, _, None) => IncomingKind::Malformed,
        };
        (self.session_id, kind)
    }
}

// ============================================================================
// Tests
// ============================================================================
