//! Boundary of the newer-dialect server component.
//!
//! The server interprets newer-dialect commands and decides which
//! [`ClientAdapter`](crate::bridge::ClientAdapter) to drive. This crate does
//! not ship one; callers provide a [`BidiServerLauncher`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::adapter::ConnectionAdapter;
use crate::bridge::passthrough::PassThroughTransport;
use crate::error::Result;

// ============================================================================
// Traits
// ============================================================================

/// A running server component.
pub trait BidiServer: Send + Sync {
    /// Stops the server. Called before the adapters and the connection close.
    fn close(&self);
}

/// Starts a server against a pass-through transport and a connection adapter.
#[async_trait]
pub trait BidiServerLauncher: Send + Sync {
    /// Starts the server.
    ///
    /// The server must install its command handler with
    /// [`PassThroughTransport::set_on_message`] and publish responses and
    /// events with [`PassThroughTransport::send_message`].
    ///
    /// # Errors
    ///
    /// Returns any error raised while the server starts.
    async fn start(
        &self,
        transport: Arc<PassThroughTransport>,
        cdp: Arc<ConnectionAdapter>,
    ) -> Result<Box<dyn BidiServer>>;
}
