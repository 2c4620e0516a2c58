//! Transport boundary and the connections built on it.
//!
//! A transport moves whole text messages. Outgoing text goes through
//! [`Transport::send`]; incoming text and the closure notification arrive as
//! [`TransportEvent`]s on a channel that a connection drains in its own
//! dispatch task.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   send(text)    ┌───────────────┐
//! │  Connection    │ ──────────────► │  Transport    │ ──► browser
//! │  (dispatch     │                 │  (WebSocket / │
//! │   task)        │ ◄────────────── │   channel)    │ ◄── browser
//! └────────────────┘ TransportEvent  └───────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `callbacks` | Request/response correlation table |
//! | `channel` | In-memory duplex transport |
//! | `websocket` | WebSocket client transport |
//! | `connection` | Older-dialect connection |
//! | `session` | Older-dialect session handle |
//! | `bidi` | Newer-dialect connection |

// ============================================================================
// Submodules
// ============================================================================

/// Newer-dialect connection.
pub mod bidi;

/// Request/response correlation.
pub mod callbacks;

/// In-memory transport.
pub mod channel;

/// Older-dialect connection and dispatch.
pub mod connection;

/// Older-dialect session handle.
pub mod session;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use bidi::{BidiConnection, BidiConnectionEvent};
pub use callbacks::CallbackRegistry;
pub use channel::{ChannelRemote, ChannelTransport};
pub use connection::{Connection, ConnectionEvent};
pub use session::{Session, SessionEvent};
pub use websocket::WebSocketTransport;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;

// ============================================================================
// Transport
// ============================================================================

/// Something delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete text message.
    Message(String),
    /// The transport closed; no further messages follow.
    Closed,
}

/// Receiving side of a transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outgoing side of a duplex text channel.
pub trait Transport: Send + Sync + 'static {
    /// Sends one text message.
    ///
    /// # Errors
    ///
    /// Fails synchronously if the message cannot be queued.
    fn send(&self, message: &str) -> Result<()>;

    /// Closes the transport. Idempotent.
    fn close(&self);
}

/// A transport together with its incoming event stream.
pub struct TransportLink {
    /// Outgoing side.
    pub transport: Arc<dyn Transport>,
    /// Incoming side.
    pub events: TransportEvents,
}

impl TransportLink {
    /// Bundles a transport with its event stream.
    #[inline]
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, events: TransportEvents) -> Self {
        Self { transport, events }
    }
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Spawns the task that feeds incoming messages to a connection.
///
/// Messages are handled strictly in arrival order. `on_message` returns
/// `false` once the connection no longer accepts messages, which ends the
/// loop. `on_close` runs exactly once when the loop ends for any reason.
pub(crate) fn spawn_dispatch<M, C>(mut events: TransportEvents, delay: Duration, on_message: M, on_close: C)
where
    M: Fn(&str) -> bool + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(text) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if !on_message(&text) {
                        break;
                    }
                }
                TransportEvent::Closed => {
                    debug!("Transport closed");
                    break;
                }
            }
        }

        on_close();
    });
}
