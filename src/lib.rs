//! Browser Wire - asynchronous browser remote-control client.
//!
//! This library drives a browser over its remote-debugging protocols:
//! the older, domain-based dialect (CDP) and the newer, module-based dialect
//! (BiDi), including BiDi spoken over a CDP connection.
//!
//! # Architecture
//!
//! ```text
//! Transport (WebSocket | in-memory)
//!     │
//!     ├─► Connection ──► Session ...            older dialect
//!     │        │
//!     │        └─► bridge::connect_bidi_over_cdp
//!     │                 │
//!     └─────────────────┴─► BidiConnection      newer dialect
//!                                │
//!                                └─► Page ─► FrameTree, NetworkManager,
//!                                            NavigationWatcher
//! ```
//!
//! Key design principles:
//!
//! - Every command is a pending call keyed by a per-connection id
//! - Responses are matched by id, events are routed by session id
//! - Closing a connection rejects every pending call exactly once
//! - Listeners are [`Subscription`]s that unregister when dropped
//!
//! # Quick Start
//!
//! ```no_run
//! use browser_wire::{Connection, ConnectionOptions, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect(
//!         "ws://127.0.0.1:9222/devtools/browser/abc",
//!         ConnectionOptions::default(),
//!     )
//!     .await?;
//!
//!     let version = connection.send("Browser.getVersion", json!({})).await?;
//!     println!("Browser: {}", version["product"]);
//!
//!     connection.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Newer dialect over an older-dialect connection |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Listener registration |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Connection and timeout settings |
//! | [`page`] | Frame tree, network table, navigation |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Transports and connections |

// ============================================================================
// Modules
// ============================================================================

/// Newer dialect over an older-dialect connection.
///
/// Use [`bridge::connect_bidi_over_cdp`] with a [`bridge::BidiServerLauncher`].
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Listener registration.
pub mod events;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Connection and timeout settings.
pub mod options;

/// Frame tree, network correlation and navigation.
pub mod page;

/// Wire message types for both dialects.
pub mod protocol;

/// Transports, connections and sessions.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge
pub use bridge::{BidiServer, BidiServerLauncher, ConnectionAdapter, connect_bidi_over_cdp};

// Error types
pub use error::{Error, Result};

// Events
pub use events::{EventEmitter, Subscription};

// Identifier types
pub use identifiers::{CallId, FrameId, NavigationId, NetworkId, SessionId, TargetId};

// Options
pub use options::{CommandOptions, ConnectionOptions, TimeoutSettings};

// Page types
pub use page::{
    Frame, FrameEvent, FrameTree, HttpRequest, HttpResponse, NavigateOptions, NavigationMode,
    NavigationWatcher, NetworkEvent, NetworkManager, Page,
};

// Transport types
pub use transport::{
    BidiConnection, BidiConnectionEvent, ChannelRemote, ChannelTransport, Connection,
    ConnectionEvent, Session, SessionEvent, Transport, TransportEvent, TransportLink,
    WebSocketTransport,
};
