//! Typed event payloads for both dialects.
//!
//! Raw events arrive as a method string plus a JSON `params` object. The
//! routing boundary converts them into closed enums ([`CdpEvent`],
//! [`BidiEvent`]) so that correlation logic never matches on strings.
//! Methods the crate does not interpret become an `Unknown`/`Other` variant
//! carrying the raw payload.
//!
//! # Interpreted Events
//!
//! | Dialect | Events |
//! |---------|--------|
//! | CDP | `Target.attachedToTarget`, `Target.detachedFromTarget` |
//! | BiDi `browsingContext` | `contextCreated`, `contextDestroyed`, `navigationStarted`, `navigationCommitted`, `fragmentNavigated`, `historyUpdated`, `domContentLoaded`, `load`, `navigationFailed`, `navigationAborted` |
//! | BiDi `network` | `beforeRequestSent`, `responseCompleted`, `fetchError` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::identifiers::{FrameId, NavigationId, NetworkId, SessionId, TargetId};

// ============================================================================
// CDP Payloads
// ============================================================================

/// Target description carried by attach events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target id.
    pub target_id: TargetId,
    /// Target type: `page`, `iframe`, `worker`, ...
    #[serde(rename = "type")]
    pub target_type: String,
    /// Current URL.
    #[serde(default)]
    pub url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedParams {
    session_id: SessionId,
    target_info: TargetInfo,
    #[serde(default)]
    waiting_for_debugger: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedParams {
    session_id: SessionId,
}

/// Older-dialect events the connection interprets itself.
#[derive(Debug, Clone, PartialEq)]
pub enum CdpEvent {
    /// A new session was attached to a target.
    AttachedToTarget {
        /// Id of the new session.
        session_id: SessionId,
        /// Target the session is bound to.
        target_info: TargetInfo,
        /// Whether the target is paused until `Runtime.runIfWaitingForDebugger`.
        waiting_for_debugger: bool,
    },

    /// A session was detached from its target.
    DetachedFromTarget {
        /// Id of the detached session.
        session_id: SessionId,
    },

    /// Any other event; routed as-is.
    Other,
}

impl CdpEvent {
    /// Parses an event from its method and parameters.
    #[must_use]
    pub fn parse(method: &str, params: &Value) -> Self {
        match method {
            "Target.attachedToTarget" => match decode::<AttachedParams>(method, params) {
                Some(p) => Self::AttachedToTarget {
                    session_id: p.session_id,
                    target_info: p.target_info,
                    waiting_for_debugger: p.waiting_for_debugger,
                },
                None => Self::Other,
            },
            "Target.detachedFromTarget" => match decode::<DetachedParams>(method, params) {
                Some(p) => Self::DetachedFromTarget {
                    session_id: p.session_id,
                },
                None => Self::Other,
            },
            _ => Self::Other,
        }
    }
}

// ============================================================================
// BiDi Payloads
// ============================================================================

/// Browsing context description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    /// Context id.
    pub context: FrameId,
    /// Parent context id; `None` for top-level contexts.
    #[serde(default)]
    pub parent: Option<FrameId>,
    /// Current URL.
    #[serde(default)]
    pub url: String,
    /// Nested children (present in `browsingContext.getTree` results).
    #[serde(default)]
    pub children: Option<Vec<ContextInfo>>,
}

impl ContextInfo {
    /// Creates a context description without children.
    #[must_use]
    pub fn new(context: impl Into<FrameId>, parent: Option<FrameId>, url: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            parent,
            url: url.into(),
            children: None,
        }
    }
}

/// Navigation-related event payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationInfo {
    /// Context the navigation happens in.
    pub context: FrameId,
    /// Navigation id; absent for some same-document updates.
    #[serde(default)]
    pub navigation: Option<NavigationId>,
    /// Target URL.
    #[serde(default)]
    pub url: String,
}

/// Request description shared by network events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Network id, stable across redirects.
    pub request: NetworkId,
    /// Request URL.
    #[serde(default)]
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Final URL.
    #[serde(default)]
    pub url: String,
    /// HTTP status.
    #[serde(default)]
    pub status: u16,
    /// HTTP status text.
    #[serde(default)]
    pub status_text: String,
    /// Whether the response was served from cache.
    #[serde(default)]
    pub from_cache: bool,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
}

/// `network.beforeRequestSent` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeRequestSent {
    /// Context that issued the request.
    #[serde(default)]
    pub context: Option<FrameId>,
    /// Navigation the request belongs to.
    #[serde(default)]
    pub navigation: Option<NavigationId>,
    /// Number of redirects so far.
    #[serde(default)]
    pub redirect_count: u32,
    /// Request data.
    pub request: RequestData,
}

/// `network.responseCompleted` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCompleted {
    /// Context that issued the request.
    #[serde(default)]
    pub context: Option<FrameId>,
    /// Navigation the response commits, if any.
    #[serde(default)]
    pub navigation: Option<NavigationId>,
    /// Request data.
    pub request: RequestData,
    /// Response data.
    pub response: ResponseData,
}

/// `network.fetchError` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchError {
    /// Context that issued the request.
    #[serde(default)]
    pub context: Option<FrameId>,
    /// Navigation the request belongs to.
    #[serde(default)]
    pub navigation: Option<NavigationId>,
    /// Request data.
    pub request: RequestData,
    /// Failure description.
    #[serde(default)]
    pub error_text: String,
}

// ============================================================================
// BidiEvent
// ============================================================================

/// Parsed newer-dialect events.
#[derive(Debug, Clone, PartialEq)]
pub enum BidiEvent {
    /// Context attached.
    ContextCreated(ContextInfo),
    /// Context detached.
    ContextDestroyed(ContextInfo),
    /// Navigation started (pending loader).
    NavigationStarted(NavigationInfo),
    /// Navigation committed a new document.
    NavigationCommitted(NavigationInfo),
    /// Fragment (same-document) navigation.
    FragmentNavigated(NavigationInfo),
    /// History API (same-document) navigation.
    HistoryUpdated(NavigationInfo),
    /// DOMContentLoaded fired.
    DomContentLoaded(NavigationInfo),
    /// Load fired.
    Load(NavigationInfo),
    /// Navigation failed.
    NavigationFailed(NavigationInfo),
    /// Navigation aborted.
    NavigationAborted(NavigationInfo),
    /// Request about to be sent.
    BeforeRequestSent(BeforeRequestSent),
    /// Response fully received.
    ResponseCompleted(ResponseCompleted),
    /// Request failed.
    FetchError(FetchError),
    /// Unknown or unparsable event.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

impl BidiEvent {
    /// Parses an event from its method and parameters.
    #[must_use]
    pub fn parse(method: &str, params: &Value) -> Self {
        let parsed = match method {
            "browsingContext.contextCreated" => decode(method, params).map(Self::ContextCreated),
            "browsingContext.contextDestroyed" => {
                decode(method, params).map(Self::ContextDestroyed)
            }
            "browsingContext.navigationStarted" => {
                decode(method, params).map(Self::NavigationStarted)
            }
            "browsingContext.navigationCommitted" => {
                decode(method, params).map(Self::NavigationCommitted)
            }
            "browsingContext.fragmentNavigated" => {
                decode(method, params).map(Self::FragmentNavigated)
            }
            "browsingContext.historyUpdated" => decode(method, params).map(Self::HistoryUpdated),
            "browsingContext.domContentLoaded" => {
                decode(method, params).map(Self::DomContentLoaded)
            }
            "browsingContext.load" => decode(method, params).map(Self::Load),
            "browsingContext.navigationFailed" => {
                decode(method, params).map(Self::NavigationFailed)
            }
            "browsingContext.navigationAborted" => {
                decode(method, params).map(Self::NavigationAborted)
            }
            "network.beforeRequestSent" => decode(method, params).map(Self::BeforeRequestSent),
            "network.responseCompleted" => decode(method, params).map(Self::ResponseCompleted),
            "network.fetchError" => decode(method, params).map(Self::FetchError),
            _ => None,
        };

        parsed.unwrap_or_else(|| Self::Unknown {
            method: method.to_string(),
            params: params.clone(),
        })
    }
}

/// Decodes event params, logging payloads that do not match the schema.
fn decode<T: DeserializeOwned>(method: &str, params: &Value) -> Option<T> {
    match T::deserialize(params) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(method, error = %e, "Malformed event params");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
