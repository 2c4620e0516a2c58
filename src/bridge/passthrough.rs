//! In-process stand-in for the newer dialect's network.
//!
//! Commands written by the consumer enter through
//! [`PassThroughTransport::emit_outgoing`] and reach the server's handler.
//! Messages produced by the server leave through
//! [`PassThroughTransport::send_message`] and reach every
//! [`on_translated`](PassThroughTransport::on_translated) listener.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::events::{EventEmitter, Subscription};

// ============================================================================
// Types
// ============================================================================

/// Server-side handler for incoming commands.
pub type CommandHandler = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// PassThroughTransport
// ============================================================================

/// Message pipe between the consumer and the bridge server.
#[derive(Default)]
pub struct PassThroughTransport {
    on_message: RwLock<Option<CommandHandler>>,
    translated: EventEmitter<Value>,
}

impl std::fmt::Debug for PassThroughTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassThroughTransport")
            .field("has_handler", &self.on_message.read().is_some())
            .field("listeners", &self.translated.listener_count())
            .finish()
    }
}

impl PassThroughTransport {
    /// Creates a transport with no server attached.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the server's command handler.
    pub fn set_on_message<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        *self.on_message.write() = Some(Arc::new(handler));
    }

    /// Hands a consumer command to the server. Dropped if no server is attached.
    pub fn emit_outgoing(&self, message: Value) {
        let handler = self.on_message.read().clone();
        match handler {
            Some(handler) => handler(message),
            None => trace!("Command dropped, no server attached"),
        }
    }

    /// Publishes a server message to the consumer.
    pub fn send_message(&self, message: Value) {
        self.translated.emit(&message);
    }

    /// Registers a listener for server messages.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_translated<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.translated.on(handler)
    }

    /// Detaches the server handler; later commands are dropped.
    pub fn close(&self) {
        *self.on_message.write() = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
