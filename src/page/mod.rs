//! Page-level state on top of a newer-dialect connection.
//!
//! A [`Page`] owns one [`FrameTree`] and one [`NetworkManager`], feeds them
//! every event of its [`BidiConnection`], and runs navigations through a
//! [`NavigationWatcher`].
//!
//! # Example
//!
//! ```ignore
//! use browser_wire::page::{NavigateOptions, Page};
//!
//! let page = Page::new(connection);
//! page.initialize().await?;
//!
//! let context = page.main_frame().ok_or(...)?;
//! let response = page.goto(&context, "https://example.com", NavigateOptions::default()).await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame_tree` | Context tree |
//! | `network` | Request correlation table |
//! | `navigation` | Navigation watcher |

// ============================================================================
// Submodules
// ============================================================================

/// Context tree.
pub mod frame_tree;

/// Navigation watcher.
pub mod navigation;

/// Request correlation table.
pub mod network;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame_tree::{Frame, FrameEvent, FrameTree};
pub use navigation::{NavigationMode, NavigationWatcher};
pub use network::{HttpRequest, HttpResponse, NetworkEvent, NetworkManager};

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::Subscription;
use crate::identifiers::FrameId;
use crate::options::{CommandOptions, TimeoutSettings, millis_to_bound};
use crate::protocol::{BrowsingContextCommand, ContextInfo, ReadinessState, SessionCommand};
use crate::transport::{BidiConnection, BidiConnectionEvent};

// ============================================================================
// Constants
// ============================================================================

/// Event modules the page subscribes to on [`Page::initialize`].
const SUBSCRIBED_EVENTS: &[&str] = &["browsingContext", "network"];

// ============================================================================
// NavigateOptions
// ============================================================================

/// Options for [`Page::goto`], [`Page::reload`] and
/// [`Page::wait_for_navigation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Navigation timeout in milliseconds (`0` disables it). Falls back to
    /// the page's navigation timeout.
    pub timeout_ms: Option<u64>,
}

impl NavigateOptions {
    /// Sets the timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

// ============================================================================
// Page
// ============================================================================

/// Frame tree, network table and navigation for one connection.
pub struct Page {
    connection: BidiConnection,
    tree: FrameTree,
    network: NetworkManager,
    timeouts: Mutex<TimeoutSettings>,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("connection", &self.connection)
            .field("tree", &self.tree)
            .field("network", &self.network)
            .finish()
    }
}

impl Page {
    /// Binds a page to a connection and starts routing its events.
    #[must_use]
    pub fn new(connection: BidiConnection) -> Self {
        let tree = FrameTree::new();
        let network = NetworkManager::new();

        let router_tree = tree.clone();
        let router_network = network.clone();
        let router = connection.on(move |event| {
            if let BidiConnectionEvent::Event(event) = event {
                router_tree.handle_event(event);
                router_network.handle_event(event);
            }
        });

        let purge_network = network.clone();
        let purge = tree.on(move |event| {
            if let FrameEvent::Detached(frame) = event {
                purge_network.clear_for_frame(&frame.id);
            }
        });

        Self {
            connection,
            tree,
            network,
            timeouts: Mutex::new(TimeoutSettings::new()),
            _subscriptions: vec![router, purge],
        }
    }

    /// Subscribes to context and network events and loads the current tree.
    ///
    /// # Errors
    ///
    /// Returns any error from the subscribe or tree commands.
    pub async fn initialize(&self) -> Result<()> {
        self.connection
            .send_command(
                SessionCommand::Subscribe {
                    events: SUBSCRIBED_EVENTS.iter().map(ToString::to_string).collect(),
                    contexts: None,
                },
                CommandOptions::default(),
            )
            .await?;

        let tree = self
            .connection
            .send_command(
                BrowsingContextCommand::GetTree {
                    root: None,
                    max_depth: None,
                },
                CommandOptions::default(),
            )
            .await?;

        let contexts: Vec<ContextInfo> = match tree.get("contexts") {
            Some(contexts) => serde_json::from_value(contexts.clone())?,
            None => Vec::new(),
        };
        debug!(contexts = contexts.len(), "Page initialized");
        for info in contexts {
            self.tree.attach(info);
        }
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &BidiConnection {
        &self.connection
    }

    /// Context tree.
    #[inline]
    #[must_use]
    pub fn frame_tree(&self) -> &FrameTree {
        &self.tree
    }

    /// Request correlation table.
    #[inline]
    #[must_use]
    pub fn network(&self) -> &NetworkManager {
        &self.network
    }

    /// First top-level context.
    #[must_use]
    pub fn main_frame(&self) -> Option<FrameId> {
        self.tree.roots().into_iter().next()
    }

    /// Snapshot of a context.
    #[must_use]
    pub fn frame(&self, id: &FrameId) -> Option<Frame> {
        self.tree.frame(id)
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Sets the default timeout in milliseconds (`0` disables it).
    pub fn set_default_timeout_ms(&self, ms: u64) {
        self.timeouts.lock().set_default_timeout_ms(ms);
    }

    /// Sets the navigation timeout in milliseconds (`0` disables it).
    pub fn set_default_navigation_timeout_ms(&self, ms: u64) {
        self.timeouts.lock().set_navigation_timeout_ms(ms);
    }

    /// Effective navigation timeout.
    #[must_use]
    pub fn navigation_timeout(&self) -> Option<Duration> {
        self.timeouts.lock().navigation_timeout()
    }

    fn resolve_timeout(&self, options: NavigateOptions) -> Option<Duration> {
        match options.timeout_ms {
            Some(ms) => millis_to_bound(ms),
            None => self.navigation_timeout(),
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Navigates a context and waits for the navigation to settle.
    ///
    /// Returns the main response, or `None` for same-document navigations.
    ///
    /// # Errors
    ///
    /// - [`Error::FrameNotFound`] if the context is unknown
    /// - [`Error::Protocol`] if the browser rejects the navigation; the
    ///   message ends with ` at {url}`
    /// - any error of [`NavigationWatcher::wait`]
    pub async fn goto(
        &self,
        context: &FrameId,
        url: &str,
        options: NavigateOptions,
    ) -> Result<Option<HttpResponse>> {
        let command = BrowsingContextCommand::Navigate {
            context: context.clone(),
            url: url.to_string(),
            wait: ReadinessState::None,
        };
        self.navigate_with(context, command, options)
            .await
            .map_err(|e| e.with_protocol_suffix(&format!(" at {url}")))
    }

    /// Reloads a context and waits for the navigation to settle.
    ///
    /// # Errors
    ///
    /// See [`goto`](Self::goto).
    pub async fn reload(
        &self,
        context: &FrameId,
        options: NavigateOptions,
    ) -> Result<Option<HttpResponse>> {
        let command = BrowsingContextCommand::Reload {
            context: context.clone(),
            wait: ReadinessState::None,
        };
        self.navigate_with(context, command, options).await
    }

    /// Waits for the next navigation of a context.
    ///
    /// The watcher is registered before this returns, so events handled
    /// before the future is first polled still count. A cross-document
    /// navigation resolves with its response, a same-document one with
    /// `None`.
    ///
    /// # Errors
    ///
    /// See [`NavigationWatcher::wait`].
    pub fn wait_for_navigation(
        &self,
        context: &FrameId,
        options: NavigateOptions,
    ) -> BoxFuture<'static, Result<Option<HttpResponse>>> {
        self.watcher(context, options).wait().boxed()
    }

    /// Waits until a context with this id is attached.
    ///
    /// # Errors
    ///
    /// See [`FrameTree::wait_for_frame`].
    pub async fn wait_for_frame(&self, id: &FrameId) -> Result<Frame> {
        let timeout = self.timeouts.lock().timeout();
        self.tree.wait_for_frame(id, timeout).await
    }

    fn watcher(&self, context: &FrameId, options: NavigateOptions) -> NavigationWatcher {
        NavigationWatcher::new(
            &self.connection,
            &self.tree,
            &self.network,
            context.clone(),
            self.resolve_timeout(options),
        )
    }

    /// Registers a watcher, sends the command, then waits.
    async fn navigate_with(
        &self,
        context: &FrameId,
        command: BrowsingContextCommand,
        options: NavigateOptions,
    ) -> Result<Option<HttpResponse>> {
        if !self.tree.contains(context) {
            return Err(Error::frame_not_found(context.clone()));
        }

        let mut watcher = self.watcher(context, options);
        let result = self
            .connection
            .send_command(command, CommandOptions::default())
            .await?;

        let mode = match result.get("navigation") {
            Some(Value::String(_)) => NavigationMode::CrossDocument,
            _ => NavigationMode::SameDocument,
        };
        watcher.expect(mode);
        watcher.wait().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::options::ConnectionOptions;
    use crate::transport::{ChannelRemote, ChannelTransport};

    fn page() -> (Page, ChannelRemote) {
        let (link, remote) = ChannelTransport::pair();
        let connection = BidiConnection::new("ws://test", link, ConnectionOptions::default());
        (Page::new(connection), remote)
    }

    fn event(method: &str, params: Value) -> Value {
        json!({"type": "event", "method": method, "params": params})
    }

    #[tokio::test]
    async fn test_initialize_loads_tree() {
        let (page, mut remote) = page();
        let server = tokio::spawn(async move {
            let subscribe = remote.recv_json().await.expect("subscribe");
            assert_eq!(subscribe["method"], "session.subscribe");
            remote.deliver_json(&json!({"type": "success", "id": subscribe["id"], "result": {}}));

            let get_tree = remote.recv_json().await.expect("getTree");
            assert_eq!(get_tree["method"], "browsingContext.getTree");
            remote.deliver_json(&json!({
                "type": "success",
                "id": get_tree["id"],
                "result": {"contexts": [{
                    "context": "A",
                    "url": "about:blank",
                    "children": [{"context": "B", "parent": "A", "url": "about:blank"}]
                }]}
            }));
            remote
        });

        page.initialize().await.expect("initialized");
        let _remote = server.await.expect("server");

        assert_eq!(page.main_frame(), Some(FrameId::from("A")));
        assert_eq!(page.frame_tree().children(&FrameId::from("A")), vec![FrameId::from("B")]);
    }

    #[tokio::test]
    async fn test_destroyed_context_purges_network() {
        let (page, remote) = page();
        remote.deliver_json(&event(
            "browsingContext.contextCreated",
            json!({"context": "A", "url": "about:blank"}),
        ));
        remote.deliver_json(&event(
            "network.beforeRequestSent",
            json!({
                "context": "A",
                "navigation": null,
                "redirectCount": 0,
                "request": {"request": "R1", "url": "https://a.test/", "method": "GET"}
            }),
        ));
        page.wait_for_frame(&FrameId::from("A")).await.expect("attached");
        tokio::task::yield_now().await;

        remote.deliver_json(&event(
            "browsingContext.contextDestroyed",
            json!({"context": "A", "url": "about:blank"}),
        ));
        for _ in 0..10 {
            if page.frame(&FrameId::from("A")).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(page.frame(&FrameId::from("A")).is_none());
        assert!(page.network().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_navigation_registers_before_poll() {
        let (page, remote) = page();
        page.frame_tree()
            .attach(ContextInfo::new("A", None, "about:blank"));

        let waiting = page.wait_for_navigation(
            &FrameId::from("A"),
            NavigateOptions::default().with_timeout_ms(1_000),
        );
        remote.deliver_json(&event(
            "browsingContext.fragmentNavigated",
            json!({"context": "A", "navigation": null, "url": "about:blank#x"}),
        ));
        for _ in 0..10 {
            if page.frame(&FrameId::from("A")).is_some_and(|frame| frame.url.ends_with("#x")) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            page.frame(&FrameId::from("A")).map(|frame| frame.url),
            Some("about:blank#x".to_string())
        );

        assert_eq!(waiting.await.expect("navigated"), None);
        assert_eq!(page.network().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_goto_unknown_frame() {
        let (page, _remote) = page();
        let err = page
            .goto(&FrameId::from("nope"), "https://a.test/", NavigateOptions::default())
            .await
            .expect_err("unknown frame");
        assert!(matches!(err, Error::FrameNotFound { .. }));
    }

    #[tokio::test]
    async fn test_goto_error_mentions_url() {
        let (page, mut remote) = page();
        page.frame_tree()
            .attach(ContextInfo::new("A", None, "about:blank"));

        let server = tokio::spawn(async move {
            let navigate = remote.recv_json().await.expect("navigate");
            assert_eq!(navigate["params"]["wait"], "none");
            remote.deliver_json(&json!({
                "type": "error",
                "id": navigate["id"],
                "error": "unknown error",
                "message": "net::ERR_NAME_NOT_RESOLVED"
            }));
            remote
        });

        let err = page
            .goto(&FrameId::from("A"), "https://nope.test/", NavigateOptions::default())
            .await
            .expect_err("rejected");
        let _remote = server.await.expect("server");

        assert!(err.to_string().ends_with(" at https://nope.test/"));
        assert_eq!(err.original_message(), Some("net::ERR_NAME_NOT_RESOLVED"));
        assert_eq!(page.frame_tree().listener_count(), 1);
    }

    #[tokio::test]
    async fn test_goto_same_document() {
        let (page, mut remote) = page();
        page.frame_tree()
            .attach(ContextInfo::new("A", None, "https://a.test/"));

        let server = tokio::spawn(async move {
            let navigate = remote.recv_json().await.expect("navigate");
            remote.deliver_json(&event(
                "browsingContext.fragmentNavigated",
                json!({"context": "A", "navigation": null, "url": "https://a.test/#x"}),
            ));
            remote.deliver_json(&json!({
                "type": "success",
                "id": navigate["id"],
                "result": {"navigation": null, "url": "https://a.test/#x"}
            }));
            remote
        });

        let response = page
            .goto(&FrameId::from("A"), "https://a.test/#x", NavigateOptions::default())
            .await
            .expect("navigated");
        let _remote = server.await.expect("server");

        assert_eq!(response, None);
        assert_eq!(
            page.frame(&FrameId::from("A")).map(|frame| frame.url),
            Some("https://a.test/#x".to_string())
        );
    }
}
