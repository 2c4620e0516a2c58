//! Older-dialect (CDP) connection and message dispatch.
//!
//! # Dispatch
//!
//! The connection spawns a tokio task that drains the transport's events
//! in arrival order and, for each message:
//!
//! - creates or removes [`Session`]s on `Target.attachedToTarget` /
//!   `Target.detachedFromTarget`
//! - routes anything carrying a `sessionId` to that session only
//! - settles root-level responses in the connection's [`CallbackRegistry`]
//! - broadcasts root-level events as [`ConnectionEvent::Protocol`]
//!
//! Messages for an unknown session are dropped: the session may have raced
//! a detach.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::events::{EventEmitter, Subscription};
use crate::identifiers::{IdGenerator, SessionId, TargetId};
use crate::options::{CommandOptions, ConnectionOptions};
use crate::protocol::{CdpEvent, Incoming, IncomingKind, Request};
use crate::transport::callbacks::{CallbackRegistry, PendingCall};
use crate::transport::session::{Session, SessionEvent};
use crate::transport::websocket::WebSocketTransport;
use crate::transport::{Transport, TransportLink, spawn_dispatch};

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Events emitted by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A root-level protocol event.
    Protocol {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
    /// A session was attached anywhere on this connection.
    SessionAttached(Session),
    /// A session was detached.
    SessionDetached(Session),
    /// The connection closed.
    Disconnected,
}

// ============================================================================
// Connection
// ============================================================================

/// Connection speaking the older dialect.
///
/// Cloning is cheap and yields a handle to the same connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and can be shared across tasks.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    url: String,
    transport: Arc<dyn Transport>,
    ids: IdGenerator,
    callbacks: CallbackRegistry,
    sessions: RwLock<FxHashMap<SessionId, Session>>,
    manually_attached: Mutex<FxHashSet<TargetId>>,
    closed: AtomicBool,
    emitter: EventEmitter<ConnectionEvent>,
    options: ConnectionOptions,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("closed", &self.is_closed())
            .field("sessions", &self.inner.sessions.read().len())
            .finish()
    }
}

impl Connection {
    /// Creates a connection over a transport and starts dispatching.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(url: impl Into<String>, link: TransportLink, options: ConnectionOptions) -> Self {
        let ids = IdGenerator::new();
        let inner = Arc::new(ConnectionInner {
            url: url.into(),
            transport: link.transport,
            callbacks: CallbackRegistry::with_ids(ids.clone(), options.raw_errors),
            ids,
            sessions: RwLock::new(FxHashMap::default()),
            manually_attached: Mutex::new(FxHashSet::default()),
            closed: AtomicBool::new(false),
            emitter: EventEmitter::new(),
            options,
        });

        let on_message: Weak<ConnectionInner> = Arc::downgrade(&inner);
        let on_close = Weak::clone(&on_message);
        spawn_dispatch(
            link.events,
            inner.options.delay,
            move |text| match on_message.upgrade() {
                Some(inner) => inner.on_message(text),
                None => false,
            },
            move || {
                if let Some(inner) = on_close.upgrade() {
                    inner.on_close();
                }
            },
        );

        Self { inner }
    }

    /// Connects to a browser WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns the transport's connection error.
    pub async fn connect(url: &str, options: ConnectionOptions) -> Result<Self> {
        let link = WebSocketTransport::connect(url).await?;
        Ok(Self::new(url, link, options))
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Options the connection was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Returns `true` once the connection has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Looks up an attached session.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.inner.session(id)
    }

    /// All attached sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.read().values().cloned().collect()
    }

    /// Returns `false` for targets attached through [`create_session`](Self::create_session).
    #[must_use]
    pub fn is_auto_attached(&self, target_id: &TargetId) -> bool {
        !self.inner.manually_attached.lock().contains(target_id)
    }

    /// Number of root-level commands awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.callbacks.pending_count()
    }

    /// Labels of root-level commands awaiting a response, oldest first.
    #[must_use]
    pub fn pending_labels(&self) -> Vec<String> {
        self.inner.callbacks.pending_labels()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a root-level command.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::TargetClosed`] if the connection closes while waiting
    /// - [`Error::Protocol`] if the browser reports an error
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.send_with(method, params, CommandOptions::default())
            .await
    }

    /// Sends a root-level command with per-call options.
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
        if self.is_closed() {
            return Err(Error::connection_closed("Connection closed."));
        }
        let timeout = options.resolve(self.inner.protocol_timeout());
        self.inner
            .raw_send(&self.inner.callbacks, method, &params, None, timeout)
            .await
    }

    /// Attaches to a target and returns its session.
    ///
    /// # Errors
    ///
    /// Returns the attach command's error, or [`Error::Protocol`] if the
    /// browser did not announce the session.
    pub async fn create_session(&self, target_id: &TargetId) -> Result<Session> {
        self.inner
            .manually_attached
            .lock()
            .insert(target_id.clone());

        let result = self
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await;

        self.inner.manually_attached.lock().remove(target_id);

        let result = result?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::from)
            .ok_or_else(|| Error::protocol("CDP session creation failed.", None))?;

        self.session(&session_id)
            .ok_or_else(|| Error::protocol("CDP session creation failed.", None))
    }

    /// Asks the browser to close.
    ///
    /// # Errors
    ///
    /// Returns the `Browser.close` command's error.
    pub async fn close_browser(&self) -> Result<()> {
        self.send("Browser.close", json!({})).await.map(|_| ())
    }

    /// Closes the connection and the transport.
    ///
    /// Pending calls are rejected with a target-closed error.
    pub fn dispose(&self) {
        self.inner.on_close();
        self.inner.transport.close();
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for connection events.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(handler)
    }
}

// ============================================================================
// ConnectionInner
// ============================================================================

impl ConnectionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn protocol_timeout(&self) -> Option<Duration> {
        self.options.protocol_timeout
    }

    fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Registers a call in `callbacks` and writes the request.
    pub(crate) fn raw_send(
        &self,
        callbacks: &CallbackRegistry,
        method: &str,
        params: &Value,
        session_id: Option<&SessionId>,
        timeout: Option<Duration>,
    ) -> PendingCall {
        callbacks.create(method, timeout, |id| {
            let message = serde_json::to_string(&Request::new(id, method, params, session_id))?;
            trace!(target: "browser_wire::protocol::send", "{message}");
            self.transport.send(&message)
        })
    }

    /// Handles one incoming message. Returns `false` once closed.
    fn on_message(self: &Arc<Self>, text: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        trace!(target: "browser_wire::protocol::recv", "{text}");

        let incoming: Incoming = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message");
                return true;
            }
        };

        let (session_id, kind) = incoming.into_parts();

        if let IncomingKind::Event { method, params } = &kind {
            match CdpEvent::parse(method, params) {
                CdpEvent::AttachedToTarget {
                    session_id: attached,
                    target_info,
                    ..
                } => self.on_attached(attached, target_info.target_type, session_id.clone()),
                CdpEvent::DetachedFromTarget {
                    session_id: detached,
                } => self.on_detached(&detached, session_id.as_ref()),
                CdpEvent::Other => {}
            }
        }

        match session_id {
            Some(session_id) => match self.session(&session_id) {
                Some(session) => session.on_message(kind),
                None => warn!(%session_id, "Message for unknown session dropped"),
            },
            None => match kind {
                IncomingKind::Success { id, result } => self.callbacks.resolve(id, result),
                IncomingKind::Failure { id, error } => self.callbacks.reject_with_code(
                    id,
                    error.code,
                    &error.full_message(),
                    Some(error.message),
                ),
                IncomingKind::Event { method, params } => {
                    self.emitter.emit(&ConnectionEvent::Protocol { method, params });
                }
                IncomingKind::Malformed => warn!("Message is neither response nor event"),
            },
        }

        !self.is_closed()
    }

    fn on_attached(
        self: &Arc<Self>,
        session_id: SessionId,
        target_type: String,
        parent_session_id: Option<SessionId>,
    ) {
        let session = Session::new(
            session_id.clone(),
            target_type,
            parent_session_id.clone(),
            Arc::downgrade(self),
            self.ids.clone(),
            self.options.raw_errors,
        );
        self.sessions.write().insert(session_id.clone(), session.clone());
        debug!(%session_id, target_type = session.target_type(), "Session attached");

        self.emitter
            .emit(&ConnectionEvent::SessionAttached(session.clone()));
        if let Some(parent) = parent_session_id.and_then(|id| self.session(&id)) {
            parent.emit(&SessionEvent::SessionAttached(session));
        }
    }

    fn on_detached(&self, session_id: &SessionId, parent_session_id: Option<&SessionId>) {
        let Some(session) = self.sessions.write().remove(session_id) else {
            return;
        };
        session.on_closed();
        debug!(%session_id, "Session detached");

        self.emitter
            .emit(&ConnectionEvent::SessionDetached(session.clone()));
        if let Some(parent) = parent_session_id.and_then(|id| self.session(id)) {
            parent.emit(&SessionEvent::SessionDetached(session));
        }
    }

    /// Marks the connection closed and fails everything pending. Idempotent.
    fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.callbacks.clear();
        let sessions: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.on_closed();
        }

        debug!(url = %self.url, "Connection closed");
        self.emitter.emit(&ConnectionEvent::Disconnected);
    }
}

// ============================================================================
// Tests
// ============================================================================
