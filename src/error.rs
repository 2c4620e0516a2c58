//! Error types for the protocol client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_wire::{Error, Result};
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     match connection.send("Browser.getVersion", json!({})).await {
//!         Err(err) if err.is_target_closed() => Ok(()),
//!         other => other.map(|_| ()),
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Timeout | [`Error::RequestTimeout`], [`Error::Timeout`] |
//! | Closure | [`Error::TargetClosed`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::UnknownSession`], [`Error::InvalidArgument`] |
//! | Navigation | [`Error::NavigationTerminated`], [`Error::FrameNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{FrameId, SessionId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// A protocol command did not receive a response in time.
    ///
    /// The label is the command method, so callers can tell a slow browser
    /// from a protocol break.
    #[error(
        "{label} timed out after {timeout_ms}ms. Increase the protocol timeout setting for a higher timeout if needed."
    )]
    RequestTimeout {
        /// Method name of the command that timed out.
        label: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Operation timeout.
    ///
    /// Returned when a navigation or wait exceeds its bound.
    #[error("{operation} timeout of {timeout_ms} ms exceeded")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Closure Errors
    // ========================================================================
    /// The target (or the whole connection) went away while a call was pending.
    #[error("{message}")]
    TargetClosed {
        /// Human-readable description, including the command label if any.
        message: String,
    },

    /// A command was attempted on a connection that is already closed.
    #[error("{message}")]
    ConnectionClosed {
        /// Description of the closed connection.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Wire-level error response.
    ///
    /// `message` is the rewritten human-readable text, `original_message`
    /// is the browser's message verbatim.
    #[error("{message}")]
    Protocol {
        /// Rewritten message, e.g. `Protocol error (Page.navigate): ...`.
        message: String,
        /// The message exactly as reported by the browser.
        original_message: Option<String>,
        /// Numeric error code (older dialect) if present.
        code: Option<i64>,
    },

    /// Bridge lookup for a session the connection does not know.
    #[error("Unknown CDP session with id {session_id}")]
    UnknownSession {
        /// The unknown session id.
        session_id: SessionId,
    },

    /// Invalid argument passed to an API.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Navigation Errors
    // ========================================================================
    /// Navigation interrupted by a detach or disconnect.
    #[error("{reason}")]
    NavigationTerminated {
        /// Why the navigation was terminated.
        reason: String,
    },

    /// Frame not found in the frame tree.
    #[error("Frame not found: {frame_id}")]
    FrameNotFound {
        /// The missing frame ID.
        frame_id: FrameId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<WsError>),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a protocol error with a separate original message.
    #[inline]
    pub fn protocol(message: impl Into<String>, original_message: Option<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            original_message,
            code: None,
        }
    }

    /// Creates a target closed error.
    #[inline]
    pub fn target_closed(message: impl Into<String>) -> Self {
        Self::TargetClosed {
            message: message.into(),
        }
    }

    /// Creates a connection closed error.
    #[inline]
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(label: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            label: label.into(),
            timeout_ms,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a navigation terminated error.
    #[inline]
    pub fn navigation_terminated(reason: impl Into<String>) -> Self {
        Self::NavigationTerminated {
            reason: reason.into(),
        }
    }

    /// Creates an unknown session error.
    #[inline]
    pub fn unknown_session(session_id: SessionId) -> Self {
        Self::UnknownSession { session_id }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a frame not found error.
    #[inline]
    pub fn frame_not_found(frame_id: FrameId) -> Self {
        Self::FrameNotFound { frame_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the target or connection was closed underneath the call.
    #[inline]
    #[must_use]
    pub fn is_target_closed(&self) -> bool {
        matches!(self, Self::TargetClosed { .. } | Self::ConnectionClosed { .. })
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. } | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns the browser's original error text for protocol errors.
    #[inline]
    #[must_use]
    pub fn original_message(&self) -> Option<&str> {
        match self {
            Self::Protocol {
                original_message, ..
            } => original_message.as_deref(),
            _ => None,
        }
    }

    /// Appends context to a protocol error message, leaving other errors untouched.
    #[must_use]
    pub(crate) fn with_protocol_suffix(self, suffix: &str) -> Self {
        match self {
            Self::Protocol {
                message,
                original_message,
                code,
            } => Self::Protocol {
                message: format!("{message}{suffix}"),
                original_message,
                code,
            },
            other => other,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_request_timeout_mentions_label() {
        let err = Error::request_timeout("Foo.bar", 10);
        let text = err.to_string();
        assert!(text.contains("Foo.bar"));
        assert!(text.contains("10ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_navigation_timeout_display() {
        let err = Error::timeout("Navigation", 500);
        assert_eq!(err.to_string(), "Navigation timeout of 500 ms exceeded");
    }

    #[test]
    fn test_protocol_error_keeps_original() {
        let err = Error::protocol(
            "Protocol error (Page.navigate): Cannot navigate",
            Some("Cannot navigate".to_string()),
        );
        assert_eq!(err.original_message(), Some("Cannot navigate"));
        assert!(err.to_string().starts_with("Protocol error (Page.navigate)"));
    }

    #[test]
    fn test_protocol_suffix() {
        let err = Error::protocol("Protocol error (x): boom", None)
            .with_protocol_suffix(" at https://example.com");
        assert_eq!(
            err.to_string(),
            "Protocol error (x): boom at https://example.com"
        );

        let other = Error::target_closed("gone").with_protocol_suffix(" at x");
        assert_eq!(other.to_string(), "gone");
    }

    #[test]
    fn test_is_target_closed() {
        assert!(Error::target_closed("Target closed").is_target_closed());
        assert!(Error::connection_closed("Connection closed.").is_target_closed());
        assert!(!Error::timeout("Navigation", 1).is_target_closed());
    }

    #[test]
    fn test_unknown_session_display() {
        let err = Error::unknown_session(SessionId::from("ABC"));
        assert_eq!(err.to_string(), "Unknown CDP session with id ABC");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
