//! WebSocket client transport.
//!
//! The socket is split: a writer task drains an outgoing command channel and
//! a reader task turns text frames into [`TransportEvent`]s. Binary, ping and
//! pong frames are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportLink};

// ============================================================================
// WriterCommand
// ============================================================================

/// Internal commands for the writer task.
enum WriterCommand {
    /// Send a text frame.
    Send(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Transport over a WebSocket connection.
#[derive(Debug)]
pub struct WebSocketTransport {
    command_tx: mpsc::UnboundedSender<WriterCommand>,
}

impl std::fmt::Debug for WriterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(_) => f.write_str("Send"),
            Self::Close => f.write_str("Close"),
        }
    }
}

impl WebSocketTransport {
    /// Connects to a WebSocket endpoint such as `ws://127.0.0.1:9222/devtools/browser/...`.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `url` is not a valid URL
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(url: &str) -> Result<TransportLink> {
        let url = Url::parse(url)?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        debug!(url = %url, "WebSocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                match command {
                    WriterCommand::Send(text) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
            debug!("WebSocket writer terminated");
        });

        tokio::spawn(async move {
            loop {
                match ws_read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events_tx
                            .send(TransportEvent::Message(text.to_string()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            let _ = events_tx.send(TransportEvent::Closed);
        });

        let transport = Arc::new(Self { command_tx });
        Ok(TransportLink::new(transport, events_rx))
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, message: &str) -> Result<()> {
        self.command_tx
            .send(WriterCommand::Send(message.to_string()))
            .map_err(|_| Error::connection_closed("WebSocket closed."))
    }

    fn close(&self) {
        let _ = self.command_tx.send(WriterCommand::Close);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_invalid_url() {
        let err = WebSocketTransport::connect("not a url")
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Url(_)));
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() {
                    ws.send(message).await.expect("echo");
                } else if message.is_close() {
                    break;
                }
            }
        });

        let mut link = WebSocketTransport::connect(&format!("ws://{addr}"))
            .await
            .expect("connect");
        link.transport.send(r#"{"id":1}"#).expect("send");

        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(r#"{"id":1}"#.to_string()))
        );

        link.transport.close();
        assert_eq!(link.events.recv().await, Some(TransportEvent::Closed));
    }
}
