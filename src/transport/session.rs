//! Older-dialect session handle.
//!
//! A [`Session`] is bound to one attached target. Its commands travel over
//! the owning [`Connection`] tagged with the session id; responses and
//! events carrying that id are delivered to the session only.
//!
//! # Lifecycle
//!
//! | State | Trigger |
//! |-------|---------|
//! | attached | `Target.attachedToTarget` |
//! | detach requested | first [`Session::detach`] call |
//! | closed | `Target.detachedFromTarget` or connection closure |

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::{EventEmitter, Subscription};
use crate::identifiers::{IdGenerator, SessionId};
use crate::options::CommandOptions;
use crate::protocol::IncomingKind;
use crate::transport::callbacks::CallbackRegistry;
use crate::transport::connection::{Connection, ConnectionInner};

// ============================================================================
// SessionEvent
// ============================================================================

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A protocol event addressed to this session.
    Protocol {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
    /// A child session was attached under this one.
    SessionAttached(Session),
    /// A child session was detached.
    SessionDetached(Session),
    /// The session closed.
    Disconnected,
}

// ============================================================================
// Session
// ============================================================================

/// Handle to an attached target.
///
/// Cloning is cheap and yields a handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    target_type: String,
    parent_session_id: Option<SessionId>,
    connection: Weak<ConnectionInner>,
    callbacks: CallbackRegistry,
    emitter: EventEmitter<SessionEvent>,
    closed: AtomicBool,
    detach_requested: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("target_type", &self.inner.target_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        target_type: String,
        parent_session_id: Option<SessionId>,
        connection: Weak<ConnectionInner>,
        ids: IdGenerator,
        raw_errors: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                target_type,
                parent_session_id,
                connection,
                callbacks: CallbackRegistry::with_ids(ids, raw_errors),
                emitter: EventEmitter::new(),
                closed: AtomicBool::new(false),
                detach_requested: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Type of the attached target (`page`, `iframe`, `worker`, ...).
    #[inline]
    #[must_use]
    pub fn target_type(&self) -> &str {
        &self.inner.target_type
    }

    /// Id of the session this one was attached through, if any.
    #[inline]
    #[must_use]
    pub fn parent_session_id(&self) -> Option<&SessionId> {
        self.inner.parent_session_id.as_ref()
    }

    /// The parent session, if it is still attached.
    #[must_use]
    pub fn parent_session(&self) -> Option<Session> {
        let parent_id = self.inner.parent_session_id.as_ref()?;
        self.connection()?.session(parent_id)
    }

    /// The owning connection, unless it has been dropped.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.upgrade().map(Connection::from_inner)
    }

    /// Returns `true` once the session is closed or a detach was requested.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.detach_requested.load(Ordering::SeqCst)
    }

    /// Number of commands awaiting a response on this session.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.callbacks.pending_count()
    }

    /// Labels of commands awaiting a response, oldest first.
    #[must_use]
    pub fn pending_labels(&self) -> Vec<String> {
        self.inner.callbacks.pending_labels()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a command to the attached target.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the session is closed or detaching
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Protocol`] if the browser reports an error
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with(method, params, CommandOptions::default())
            .await
    }

    /// Sends a command with per-call options.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_with(
        &self,
        method: &str,
        params: Value,
        options: CommandOptions,
    ) -> Result<Value> {
        let connection = match self.inner.connection.upgrade() {
            Some(connection) if !self.is_closed() && !connection.is_closed() => connection,
            _ => return Err(self.closed_error(method)),
        };

        let timeout = options.resolve(connection.protocol_timeout());
        let call = connection.raw_send(
            &self.inner.callbacks,
            method,
            &params,
            Some(&self.inner.id),
            timeout,
        );
        drop(connection);

        call.await
    }

    /// Detaches from the target.
    ///
    /// Only the first call sends `Target.detachFromTarget`; later calls
    /// return immediately. If the command fails the session stays usable
    /// and detaching can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetClosed`] if the session was already closed by
    /// the browser, or the error of the detach command itself.
    pub async fn detach(&self) -> Result<()> {
        if self.inner.detach_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let connection = match self.connection() {
            Some(connection) if !self.inner.closed.load(Ordering::SeqCst) => connection,
            _ => {
                return Err(Error::target_closed(format!(
                    "Session already detached. Most likely the {} has been closed.",
                    self.inner.target_type
                )));
            }
        };

        debug!(session_id = %self.inner.id, "Detaching session");
        let result = connection
            .send("Target.detachFromTarget", json!({ "sessionId": self.inner.id }))
            .await;
        if let Err(e) = &result {
            warn!(session_id = %self.inner.id, error = %e, "Detach failed; session stays attached");
            self.inner.detach_requested.store(false, Ordering::SeqCst);
        }
        result.map(|_| ())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for session events.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(handler)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn closed_error(&self, method: &str) -> Error {
        Error::target_closed(format!(
            "Protocol error ({method}): Session closed. Most likely the {} has been closed.",
            self.inner.target_type
        ))
    }

    /// Delivers a message routed to this session.
    pub(crate) fn on_message(&self, kind: IncomingKind) {
        match kind {
            IncomingKind::Success { id, result } => self.inner.callbacks.resolve(id, result),
            IncomingKind::Failure { id, error } => self.inner.callbacks.reject_with_code(
                id,
                error.code,
                &error.full_message(),
                Some(error.message),
            ),
            IncomingKind::Event { method, params } => {
                self.inner.emitter.emit(&SessionEvent::Protocol { method, params });
            }
            IncomingKind::Malformed => {}
        }
    }

    pub(crate) fn emit(&self, event: &SessionEvent) {
        self.inner.emitter.emit(event);
    }

    /// Rejects pending calls and marks the session closed. Idempotent.
    pub(crate) fn on_closed(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.callbacks.clear();
        debug!(session_id = %self.inner.id, "Session closed");
        self.inner.emitter.emit(&SessionEvent::Disconnected);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_on_orphan_session_fails_fast() {
        let session = Session::new(
            SessionId::from("S1"),
            "page".to_string(),
            None,
            Weak::new(),
            IdGenerator::new(),
            false,
        );

        let err = session
            .send("Runtime.evaluate", json!({}))
            .await
            .expect_err("no connection");
        assert!(err.is_target_closed());
        assert_eq!(
            err.to_string(),
            "Protocol error (Runtime.evaluate): Session closed. Most likely the page has been closed."
        );
    }

    #[tokio::test]
    async fn test_on_closed_is_idempotent() {
        let session = Session::new(
            SessionId::from("S1"),
            "iframe".to_string(),
            None,
            Weak::new(),
            IdGenerator::new(),
            false,
        );

        let disconnects = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        let _sub = session.on(move |event| {
            if matches!(event, SessionEvent::Disconnected) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        session.on_closed();
        session.on_closed();

        assert!(session.is_closed());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
