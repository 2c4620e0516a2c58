//! Older-dialect clients exposed to the bridge server.
//!
//! The server talks to the browser through [`ClientAdapter`]s: one for the
//! root [`Connection`] and one per [`Session`], memoized by the
//! [`ConnectionAdapter`]. Each adapter re-emits every protocol event of its
//! client and swallows "already closed" failures once the client is gone.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{EventEmitter, Subscription};
use crate::identifiers::SessionId;
use crate::transport::{Connection, ConnectionEvent, Session, SessionEvent};

// ============================================================================
// CdpClient
// ============================================================================

/// Handler for forwarded protocol events: `(method, params)`.
pub type ProtocolHandler = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Anything that can send older-dialect commands and emit their events.
#[async_trait]
pub trait CdpClient: Send + Sync {
    /// Sends a command.
    async fn send(&self, method: &str, params: Value) -> Result<Value>;

    /// Registers a listener for every protocol event.
    fn on_protocol(&self, handler: ProtocolHandler) -> Subscription;

    /// Session id, or `None` for the root connection.
    fn session_id(&self) -> Option<SessionId>;
}

#[async_trait]
impl CdpClient for Connection {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        Connection::send(self, method, params).await
    }

    fn on_protocol(&self, handler: ProtocolHandler) -> Subscription {
        self.on(move |event| {
            if let ConnectionEvent::Protocol { method, params } = event {
                handler(method.as_str(), params);
            }
        })
    }

    fn session_id(&self) -> Option<SessionId> {
        None
    }
}

#[async_trait]
impl CdpClient for Session {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        Session::send(self, method, params).await
    }

    fn on_protocol(&self, handler: ProtocolHandler) -> Subscription {
        self.on(move |event| {
            if let SessionEvent::Protocol { method, params } = event {
                handler(method.as_str(), params);
            }
        })
    }

    fn session_id(&self) -> Option<SessionId> {
        Some(self.id().clone())
    }
}

// ============================================================================
// ForwardedEvent
// ============================================================================

/// A protocol event re-emitted by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedEvent {
    /// Event method.
    pub method: String,
    /// Event params.
    pub params: Value,
}

// ============================================================================
// ClientAdapter
// ============================================================================

/// Bridge-facing wrapper around one older-dialect client.
pub struct ClientAdapter {
    client: Arc<dyn CdpClient>,
    session_id: Option<SessionId>,
    browser_client: Option<Arc<ClientAdapter>>,
    emitter: EventEmitter<ForwardedEvent>,
    forward: Mutex<Option<Subscription>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ClientAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAdapter")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientAdapter {
    /// Wraps a client and starts forwarding its events.
    #[must_use]
    pub fn new(client: Arc<dyn CdpClient>, browser_client: Option<Arc<ClientAdapter>>) -> Self {
        let emitter = EventEmitter::new();
        let sink = emitter.clone();
        let forward = client.on_protocol(Box::new(move |method: &str, params: &Value| {
            sink.emit(&ForwardedEvent {
                method: method.to_string(),
                params: params.clone(),
            });
        }));

        Self {
            session_id: client.session_id(),
            client,
            browser_client,
            emitter,
            forward: Mutex::new(Some(forward)),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id of the wrapped client, `None` for the root.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Adapter of the root connection. `None` on the root adapter itself.
    #[inline]
    #[must_use]
    pub fn browser_client(&self) -> Option<&Arc<ClientAdapter>> {
        self.browser_client.as_ref()
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a command through the wrapped client.
    ///
    /// Returns `Value::Null` instead of failing when the adapter or its
    /// client is already closed.
    ///
    /// # Errors
    ///
    /// Propagates every error other than a closed target or connection.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Ok(Value::Null);
        }

        match self.client.send(method, params).await {
            Ok(result) => Ok(result),
            Err(e) if self.is_closed() || Self::is_close_error(&e) => {
                debug!(method, error = %e, "Command on closed client ignored");
                Ok(Value::Null)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether an error means the client went away.
    #[inline]
    #[must_use]
    pub fn is_close_error(error: &Error) -> bool {
        error.is_target_closed()
    }

    /// Registers a listener for forwarded events.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ForwardedEvent) + Send + Sync + 'static,
    {
        self.emitter.on(handler)
    }

    /// Stops forwarding events and marks the adapter closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(forward) = self.forward.lock().take() {
            forward.close();
        }
    }
}

// ============================================================================
// ConnectionAdapter
// ============================================================================

/// Hands out one [`ClientAdapter`] per session, plus the root adapter.
pub struct ConnectionAdapter {
    cdp: Connection,
    browser: Arc<ClientAdapter>,
    adapters: Mutex<FxHashMap<SessionId, Arc<ClientAdapter>>>,
}

impl std::fmt::Debug for ConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAdapter")
            .field("adapters", &self.adapters.lock().len())
            .finish()
    }
}

impl ConnectionAdapter {
    /// Wraps a connection.
    #[must_use]
    pub fn new(cdp: Connection) -> Self {
        let browser = Arc::new(ClientAdapter::new(Arc::new(cdp.clone()), None));
        Self {
            cdp,
            browser,
            adapters: Mutex::new(FxHashMap::default()),
        }
    }

    /// Adapter for the root connection.
    #[inline]
    #[must_use]
    pub fn browser_client(&self) -> Arc<ClientAdapter> {
        Arc::clone(&self.browser)
    }

    /// Adapter for a session, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] if the connection has no such session.
    pub fn get_client(&self, session_id: &SessionId) -> Result<Arc<ClientAdapter>> {
        let session = self
            .cdp
            .session(session_id)
            .ok_or_else(|| Error::unknown_session(session_id.clone()))?;

        let mut adapters = self.adapters.lock();
        let adapter = adapters.entry(session_id.clone()).or_insert_with(|| {
            Arc::new(ClientAdapter::new(
                Arc::new(session),
                Some(Arc::clone(&self.browser)),
            ))
        });
        Ok(Arc::clone(adapter))
    }

    /// Number of memoized session adapters.
    #[inline]
    #[must_use]
    pub fn adapter_count(&self) -> usize {
        self.adapters.lock().len()
    }

    /// Closes the root adapter and every session adapter.
    pub fn close(&self) {
        self.browser.close();
        let adapters: Vec<Arc<ClientAdapter>> = self.adapters.lock().values().cloned().collect();
        for adapter in adapters {
            adapter.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    /// Client that fails every command with a fixed error.
    struct FailingClient {
        closed: bool,
        calls: AtomicUsize,
        emitter: EventEmitter<ForwardedEvent>,
    }

    #[async_trait]
    impl CdpClient for FailingClient {
        async fn send(&self, method: &str, _params: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.closed {
                Err(Error::target_closed(format!(
                    "Protocol error ({method}): Session closed."
                )))
            } else {
                Err(Error::protocol("Protocol error: boom", None))
            }
        }

        fn on_protocol(&self, handler: ProtocolHandler) -> Subscription {
            self.emitter.on(move |event| handler(event.method.as_str(), &event.params))
        }

        fn session_id(&self) -> Option<SessionId> {
            Some(SessionId::from("S1"))
        }
    }

    fn client(closed: bool) -> Arc<FailingClient> {
        Arc::new(FailingClient {
            closed,
            calls: AtomicUsize::new(0),
            emitter: EventEmitter::new(),
        })
    }

    #[tokio::test]
    async fn test_closed_target_resolves_empty() {
        let adapter = ClientAdapter::new(client(true), None);
        let result = adapter
            .send_command("Page.enable", json!({}))
            .await
            .expect("swallowed");
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let adapter = ClientAdapter::new(client(false), None);
        let err = adapter
            .send_command("Page.enable", json!({}))
            .await
            .expect_err("propagated");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_closed_adapter_skips_send() {
        let inner = client(false);
        let adapter = ClientAdapter::new(inner.clone(), None);
        adapter.close();

        let result = adapter
            .send_command("Page.enable", json!({}))
            .await
            .expect("skipped");
        assert_eq!(result, Value::Null);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_adapter_per_session() {
        use crate::options::ConnectionOptions;
        use crate::transport::ChannelTransport;

        let (link, remote) = ChannelTransport::pair();
        let cdp = Connection::new("ws://test", link, ConnectionOptions::default());
        remote.deliver_json(&json!({
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": "S1",
                "targetInfo": {"targetId": "T1", "type": "page", "url": ""},
                "waitingForDebugger": false
            }
        }));
        for _ in 0..10 {
            if cdp.session(&SessionId::from("S1")).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let adapters = ConnectionAdapter::new(cdp);
        let first = adapters.get_client(&SessionId::from("S1")).expect("S1");
        let second = adapters.get_client(&SessionId::from("S1")).expect("S1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(adapters.adapter_count(), 1);
        assert!(Arc::ptr_eq(
            first.browser_client().expect("root"),
            &adapters.browser_client()
        ));

        adapters.close();
        assert!(first.is_closed());
        assert!(adapters.browser_client().is_closed());
    }

    #[test]
    fn test_events_forwarded_until_close() {
        let inner = client(false);
        let adapter = ClientAdapter::new(inner.clone(), None);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _sub = adapter.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let event = ForwardedEvent {
            method: "Page.loadEventFired".to_string(),
            params: json!({}),
        };
        inner.emitter.emit(&event);
        adapter.close();
        inner.emitter.emit(&event);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(inner.emitter.listener_count(), 0);
    }
}
