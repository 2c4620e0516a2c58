//! Typed newer-dialect commands used by the page layer.
//!
//! Commands serialize to `{"method": "...", "params": {...}}` and are split
//! into method and params with [`Command::into_parts`] before being handed
//! to a connection.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `browsingContext` | Navigate, reload, tree queries |
//! | `session` | Status, subscriptions |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::FrameId;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All typed commands, organized by module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// BrowsingContext module commands.
    BrowsingContext(BrowsingContextCommand),
    /// Session module commands.
    Session(SessionCommand),
}

impl Command {
    /// Splits the command into its method name and params object.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the command cannot be serialized.
    pub fn into_parts(self) -> Result<(String, Value)> {
        let mut value = serde_json::to_value(self)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = value
            .get_mut("params")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((method, params))
    }
}

impl From<BrowsingContextCommand> for Command {
    fn from(command: BrowsingContextCommand) -> Self {
        Self::BrowsingContext(command)
    }
}

impl From<SessionCommand> for Command {
    fn from(command: SessionCommand) -> Self {
        Self::Session(command)
    }
}

// ============================================================================
// BrowsingContext Commands
// ============================================================================

/// Readiness state a navigation command waits for before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// Return as soon as the navigation has started.
    #[default]
    None,
    /// Wait for `DOMContentLoaded`.
    Interactive,
    /// Wait for `load`.
    Complete,
}

/// BrowsingContext module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowsingContextCommand {
    /// Navigate a context to a URL.
    #[serde(rename = "browsingContext.navigate")]
    Navigate {
        /// Context to navigate.
        context: FrameId,
        /// Destination URL.
        url: String,
        /// Readiness state to wait for.
        wait: ReadinessState,
    },

    /// Reload a context.
    #[serde(rename = "browsingContext.reload")]
    Reload {
        /// Context to reload.
        context: FrameId,
        /// Readiness state to wait for.
        wait: ReadinessState,
    },

    /// Fetch the context tree.
    #[serde(rename = "browsingContext.getTree")]
    GetTree {
        /// Restrict the tree to one root.
        #[serde(skip_serializing_if = "Option::is_none")]
        root: Option<FrameId>,
        /// Maximum depth of the returned tree.
        #[serde(rename = "maxDepth", skip_serializing_if = "Option::is_none")]
        max_depth: Option<u32>,
    },
}

// ============================================================================
// Session Commands
// ============================================================================

/// Session module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum SessionCommand {
    /// Query server readiness.
    #[serde(rename = "session.status")]
    Status {},

    /// Subscribe to event modules or methods.
    #[serde(rename = "session.subscribe")]
    Subscribe {
        /// Event names, e.g. `browsingContext` or `network.beforeRequestSent`.
        events: Vec<String>,
        /// Restrict delivery to these contexts.
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<FrameId>>,
    },
}

// ============================================================================
// Tests
// ============================================================================
