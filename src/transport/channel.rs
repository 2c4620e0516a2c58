//! In-memory duplex transport.
//!
//! [`ChannelTransport::pair`] returns a [`TransportLink`] for a connection
//! and a [`ChannelRemote`] that plays the browser: it reads what the
//! connection sends and delivers replies and events back.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportLink};

// ============================================================================
// ChannelTransport
// ============================================================================

/// Local end of an in-memory transport.
#[derive(Debug)]
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Creates a connected pair of ends.
    #[must_use]
    pub fn pair() -> (TransportLink, ChannelRemote) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            outgoing: outgoing_tx,
            events: events_tx.clone(),
            closed: AtomicBool::new(false),
        });

        let remote = ChannelRemote {
            outgoing: outgoing_rx,
            events: events_tx,
        };

        (TransportLink::new(transport, events_rx), remote)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed("Transport closed."));
        }
        self.outgoing
            .send(message.to_string())
            .map_err(|_| Error::connection_closed("Remote end dropped."))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed);
        }
    }
}

// ============================================================================
// ChannelRemote
// ============================================================================

/// Far end of an in-memory transport.
#[derive(Debug)]
pub struct ChannelRemote {
    outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ChannelRemote {
    /// Waits for the next message sent by the local end.
    pub async fn recv_outgoing(&mut self) -> Option<String> {
        self.outgoing.recv().await
    }

    /// Waits for the next message and parses it as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the local end is gone or sent invalid JSON.
    pub async fn recv_json(&mut self) -> Result<Value> {
        let text = self
            .recv_outgoing()
            .await
            .ok_or_else(|| Error::connection_closed("Local end dropped."))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Returns a sent message if one is already queued.
    pub fn try_recv_outgoing(&mut self) -> Option<String> {
        self.outgoing.try_recv().ok()
    }

    /// Delivers a text message to the local end.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Delivers a JSON message to the local end.
    pub fn deliver_json(&self, value: &Value) {
        self.deliver(value.to_string());
    }

    /// Simulates the browser closing the transport.
    pub fn close_remote(&self) {
        let _ = self.events.send(TransportEvent::Closed);
    }
}

// ============================================================================
// Tests
// ============================================================================
