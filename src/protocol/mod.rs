//! Wire message types for both protocol dialects.
//!
//! # Dialects
//!
//! | Dialect | Envelope | Routing |
//! |---------|----------|---------|
//! | CDP (older) | `{id, method, params, sessionId?}` | `sessionId` selects the session |
//! | BiDi (newer) | `{id, method, params}` / `{type, ...}` | scoping inside `params` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `request` | CDP requests, responses and events |
//! | `bidi` | BiDi commands and server messages |
//! | `command` | Typed BiDi commands |
//! | `event` | Typed event payloads for both dialects |

// ============================================================================
// Submodules
// ============================================================================

/// Newer-dialect envelopes.
pub mod bidi;

/// Typed newer-dialect commands.
pub mod command;

/// Typed event payloads.
pub mod event;

/// Older-dialect envelopes.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use bidi::{BidiCommand, BidiMessage, error_text};
pub use command::{BrowsingContextCommand, Command, ReadinessState, SessionCommand};
pub use event::{
    BeforeRequestSent, BidiEvent, CdpEvent, ContextInfo, FetchError, NavigationInfo, RequestData,
    ResponseCompleted, ResponseData, TargetInfo,
};
pub use request::{ErrorPayload, Incoming, IncomingKind, Request};
