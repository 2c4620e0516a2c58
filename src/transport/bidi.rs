//! Newer-dialect (BiDi) connection.
//!
//! Same correlation, timeout and closure semantics as
//! [`Connection`](crate::transport::Connection), with the newer envelope:
//! commands are `{id, method, params}` and every server message carries a
//! `type` of `success`, `error` or `event`. There is no session routing at
//! this level; events are parsed into [`BidiEvent`]s and broadcast.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::events::{EventEmitter, Subscription};
use crate::identifiers::IdGenerator;
use crate::options::{CommandOptions, ConnectionOptions};
use crate::protocol::{BidiCommand, BidiEvent, BidiMessage, Command, error_text};
use crate::transport::callbacks::CallbackRegistry;
use crate::transport::{Transport, TransportLink, spawn_dispatch};

// ============================================================================
// BidiConnectionEvent
// ============================================================================

/// Events emitted by a [`BidiConnection`].
#[derive(Debug, Clone)]
pub enum BidiConnectionEvent {
    /// A parsed server event.
    Event(BidiEvent),
    /// The connection closed.
    Disconnected,
}

// ============================================================================
// BidiConnection
// ============================================================================

/// Connection speaking the newer dialect.
///
/// Cloning is cheap and yields a handle to the same connection.
#[derive(Clone)]
pub struct BidiConnection {
    inner: Arc<BidiInner>,
}

struct BidiInner {
    url: String,
    transport: Arc<dyn Transport>,
    callbacks: CallbackRegistry,
    closed: AtomicBool,
    emitter: EventEmitter<BidiConnectionEvent>,
    options: ConnectionOptions,
}

impl std::fmt::Debug for BidiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BidiConnection")
            .field("url", &self.inner.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BidiConnection {
    /// Creates a connection over a transport and starts dispatching.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(url: impl Into<String>, link: TransportLink, options: ConnectionOptions) -> Self {
        let inner = Arc::new(BidiInner {
            url: url.into(),
            transport: link.transport,
            callbacks: CallbackRegistry::with_ids(IdGenerator::new(), options.raw_errors),
            closed: AtomicBool::new(false),
            emitter: EventEmitter::new(),
            options,
        });

        let on_message: Weak<BidiInner> = Arc::downgrade(&inner);
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

    /// Endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns `true` once the connection has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of commands awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.callbacks.pending_count()
    }

    /// Sends a command.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::TargetClosed`] if the connection closes while waiting
    /// - [`Error::Protocol`] if the server reports an error
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
        if self.is_closed() {
            return Err(Error::connection_closed("Connection closed."));
        }

        let timeout = options.resolve(self.inner.options.protocol_timeout);
        let transport = &self.inner.transport;
        self.inner
            .callbacks
            .create(method, timeout, |id| {
                let message = serde_json::to_string(&BidiCommand::new(id, method, params))?;
                trace!(target: "browser_wire::bidi::send", "{message}");
                transport.send(&message)
            })
            .await
    }

    /// Sends a typed command.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_command(&self, command: impl Into<Command>, options: CommandOptions) -> Result<Value> {
        let (method, params) = command.into().into_parts()?;
        self.send_with(&method, params, options).await
    }

    /// Closes the connection and the transport.
    pub fn dispose(&self) {
        self.inner.on_close();
        self.inner.transport.close();
    }

    /// Registers a listener for connection events.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BidiConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.on(handler)
    }
}

// ============================================================================
// BidiInner
// ============================================================================

impl BidiInner {
    /// Handles one incoming message. Returns `false` once closed.
    fn on_message(&self, text: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        trace!(target: "browser_wire::bidi::recv", "{text}");

        let message: BidiMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message");
                return true;
            }
        };

        match message {
            BidiMessage::Success { id, result } => self.callbacks.resolve(id, result),
            BidiMessage::Error {
                id: Some(id),
                error,
                message,
                stacktrace,
            } => {
                let text = error_text(&error, &message, stacktrace.as_deref());
                self.callbacks.reject(id, &text, Some(message));
            }
            BidiMessage::Error {
                id: None,
                error,
                message,
                ..
            } => warn!(error = %error, message = %message, "Protocol error without command id"),
            BidiMessage::Event { method, params } => {
                let event = BidiEvent::parse(&method, &params);
                self.emitter.emit(&BidiConnectionEvent::Event(event));
            }
        }

        !self.closed.load(Ordering::SeqCst)
    }

    /// Marks the connection closed and fails everything pending. Idempotent.
    fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.callbacks.clear();
        debug!(url = %self.url, "BiDi connection closed");
        self.emitter.emit(&BidiConnectionEvent::Disconnected);
    }
}

// ============================================================================
// Tests
// ============================================================================
