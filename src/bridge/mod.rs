//! Newer dialect over an older-dialect connection.
//!
//! [`connect_bidi_over_cdp`] returns a [`BidiConnection`] whose transport is
//! not a socket but an in-process pipe into a server component, which in
//! turn drives the older-dialect [`Connection`] through adapters.
//!
//! # Architecture
//!
//! ```text
//! BidiConnection ──send──► BridgeTransport ──emit_outgoing──► server
//!       ▲                                                       │
//!       └──── TransportEvent ◄── on_translated ◄── send_message ┘
//!                                                               │
//!                              ConnectionAdapter ◄──────────────┘
//!                                ├─ root ClientAdapter ──► Connection
//!                                └─ ClientAdapter per Session
//! ```
//!
//! # Shutdown Order
//!
//! Disposing the returned connection closes the server first, then every
//! adapter, then the older-dialect connection.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `passthrough` | Pipe between consumer and server |
//! | `adapter` | Older-dialect clients for the server |
//! | `server` | Server component boundary |

// ============================================================================
// Submodules
// ============================================================================

/// Older-dialect clients exposed to the server.
pub mod adapter;

/// In-process message pipe.
pub mod passthrough;

/// Server component boundary.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapter::{CdpClient, ClientAdapter, ConnectionAdapter, ForwardedEvent, ProtocolHandler};
pub use passthrough::{CommandHandler, PassThroughTransport};
pub use server::{BidiServer, BidiServerLauncher};

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::events::Subscription;
use crate::transport::{
    BidiConnection, Connection, ConnectionEvent, Transport, TransportEvent, TransportLink,
};

// ============================================================================
// connect_bidi_over_cdp
// ============================================================================

/// Speaks the newer dialect over an older-dialect connection.
///
/// The returned connection shares the older connection's URL and options.
///
/// # Errors
///
/// Returns the launcher's error if the server fails to start; the adapters
/// are closed in that case, the older connection is left open.
pub async fn connect_bidi_over_cdp(
    cdp: Connection,
    launcher: &dyn BidiServerLauncher,
) -> Result<BidiConnection> {
    let passthrough = Arc::new(PassThroughTransport::new());
    let adapter = Arc::new(ConnectionAdapter::new(cdp.clone()));
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let translated_tx = events_tx.clone();
    let translated = passthrough.on_translated(move |message| {
        let _ = translated_tx.send(TransportEvent::Message(message.to_string()));
    });
    let disconnected = cdp.on(move |event| {
        if matches!(event, ConnectionEvent::Disconnected) {
            let _ = events_tx.send(TransportEvent::Closed);
        }
    });

    let bridge = Arc::new(BridgeTransport {
        passthrough: Arc::clone(&passthrough),
        adapter: Arc::clone(&adapter),
        cdp: cdp.clone(),
        server: Mutex::new(None),
        subscriptions: Mutex::new(vec![translated, disconnected]),
        closed: AtomicBool::new(false),
    });

    let connection = BidiConnection::new(
        cdp.url(),
        TransportLink::new(bridge.clone(), events_rx),
        cdp.options().clone(),
    );

    match launcher.start(passthrough, Arc::clone(&adapter)).await {
        Ok(server) => {
            *bridge.server.lock() = Some(server);
            debug!(url = cdp.url(), "BiDi bridge started");
            Ok(connection)
        }
        Err(e) => {
            adapter.close();
            bridge.subscriptions.lock().clear();
            Err(e)
        }
    }
}

// ============================================================================
// BridgeTransport
// ============================================================================

/// Transport of the consumer-facing connection.
struct BridgeTransport {
    passthrough: Arc<PassThroughTransport>,
    adapter: Arc<ConnectionAdapter>,
    cdp: Connection,
    server: Mutex<Option<Box<dyn BidiServer>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    closed: AtomicBool,
}

impl Transport for BridgeTransport {
    fn send(&self, message: &str) -> Result<()> {
        let command: Value = serde_json::from_str(message)?;
        self.passthrough.emit_outgoing(command);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(server) = self.server.lock().take() {
            server.close();
        }
        self.passthrough.close();
        self.adapter.close();
        self.subscriptions.lock().clear();
        self.cdp.dispose();
        debug!("BiDi bridge closed");
    }
}
