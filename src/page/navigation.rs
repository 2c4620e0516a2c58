//! Per-navigation watcher.
//!
//! A [`NavigationWatcher`] subscribes to the frame tree, the network table
//! and the connection, then races their signals against a deadline until it
//! settles on exactly one outcome.
//!
//! # Outcome Rules
//!
//! | Signal | Effect |
//! |--------|--------|
//! | connection closed | fail: browser disconnected |
//! | frame detached | fail: frame detached |
//! | navigation started (unpinned) | switch to cross-document |
//! | navigated (matching mode) | navigation observed |
//! | navigation request finished | response decided unless it is a redirect |
//! | navigation request failed | decided: no response |
//! | deadline | fail: timeout |
//!
//! The watcher resolves once a navigation was observed and a response was
//! decided. Until [`NavigationWatcher::expect`] pins the mode, a
//! same-document watcher follows a cross-document navigation that starts
//! or commits in its frame. Termination signals queued in the same turn win over success.
//! Every subscription is released before [`NavigationWatcher::wait`]
//! returns, on every path.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::Subscription;
use crate::identifiers::FrameId;
use crate::options::bound_to_millis;
use crate::page::frame_tree::{FrameEvent, FrameTree};
use crate::page::network::{HttpRequest, HttpResponse, NetworkEvent, NetworkManager};
use crate::transport::{BidiConnection, BidiConnectionEvent};

// ============================================================================
// Constants
// ============================================================================

const DISCONNECTED: &str = "Navigation failed because browser has disconnected!";
const DETACHED: &str = "Navigating frame was detached";

// ============================================================================
// NavigationMode
// ============================================================================

/// Which kind of navigation completes the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationMode {
    /// Fragment or history navigation; resolves with no response.
    SameDocument,
    /// Document load; resolves with the navigation request's response.
    CrossDocument,
}

// ============================================================================
// Signals
// ============================================================================

#[derive(Debug)]
enum WatchSignal {
    NavigationStarted,
    Navigated { same_document: bool },
    Request(Arc<HttpRequest>),
    RequestFinished(Arc<HttpRequest>),
    Detached,
    Disconnected,
}

impl WatchSignal {
    fn termination(&self) -> Option<Error> {
        match self {
            Self::Disconnected => Some(Error::navigation_terminated(DISCONNECTED)),
            Self::Detached => Some(Error::navigation_terminated(DETACHED)),
            _ => None,
        }
    }
}

// ============================================================================
// NavigationWatcher
// ============================================================================

/// Watches one frame for one navigation.
#[derive(Debug)]
pub struct NavigationWatcher {
    frame_id: FrameId,
    mode: NavigationMode,
    pinned: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    signals: mpsc::UnboundedReceiver<WatchSignal>,
    subscriptions: Vec<Subscription>,
}

impl NavigationWatcher {
    /// Subscribes to every signal source and starts the clock.
    ///
    /// The mode is cross-document if the frame has a pending navigation,
    /// same-document otherwise. A frame missing from the tree counts as
    /// detached.
    #[must_use]
    pub fn new(
        connection: &BidiConnection,
        tree: &FrameTree,
        network: &NetworkManager,
        frame_id: FrameId,
        timeout: Option<Duration>,
    ) -> Self {
        let deadline = timeout.map(|bound| Instant::now() + bound);
        let (tx, signals) = mpsc::unbounded_channel();

        let disconnect_tx = tx.clone();
        let disconnected = connection.on(move |event| {
            if matches!(event, BidiConnectionEvent::Disconnected) {
                let _ = disconnect_tx.send(WatchSignal::Disconnected);
            }
        });

        let frame_tx = tx.clone();
        let watched = frame_id.clone();
        let frames = tree.on(move |event| {
            let signal = match event {
                FrameEvent::Detached(frame) if frame.id == watched => WatchSignal::Detached,
                FrameEvent::NavigationStarted { frame, .. } if frame.id == watched => {
                    WatchSignal::NavigationStarted
                }
                FrameEvent::Navigated {
                    frame,
                    same_document,
                } if frame.id == watched => WatchSignal::Navigated {
                    same_document: *same_document,
                },
                _ => return,
            };
            let _ = frame_tx.send(signal);
        });

        let network_tx = tx.clone();
        let watched = frame_id.clone();
        let requests = network.on(move |event| {
            let (NetworkEvent::Request(request)
            | NetworkEvent::RequestFinished(request)
            | NetworkEvent::RequestFailed(request)) = event
            else {
                return;
            };
            if request.frame_id() != Some(&watched) || !request.is_navigation_request() {
                return;
            }
            let request = Arc::clone(request);
            let signal = match event {
                NetworkEvent::Request(_) => WatchSignal::Request(request),
                _ => WatchSignal::RequestFinished(request),
            };
            let _ = network_tx.send(signal);
        });

        if connection.is_closed() {
            let _ = tx.send(WatchSignal::Disconnected);
        }
        if !tree.contains(&frame_id) {
            let _ = tx.send(WatchSignal::Detached);
        }

        let mode = if tree.has_pending_navigation(&frame_id) {
            NavigationMode::CrossDocument
        } else {
            NavigationMode::SameDocument
        };

        Self {
            frame_id,
            mode,
            pinned: false,
            timeout,
            deadline,
            signals,
            subscriptions: vec![disconnected, frames, requests],
        }
    }

    /// Current mode.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> NavigationMode {
        self.mode
    }

    /// Pins the mode; later navigation starts no longer switch it.
    pub fn expect(&mut self, mode: NavigationMode) {
        self.mode = mode;
        self.pinned = true;
    }

    /// Waits for the navigation to settle.
    ///
    /// Returns the navigation response, or `None` for same-document
    /// navigations and navigations that produced no usable response.
    ///
    /// # Errors
    ///
    /// - [`Error::NavigationTerminated`] if the frame detaches or the
    ///   connection closes first
    /// - [`Error::Timeout`] if the deadline passes first
    pub async fn wait(self) -> Result<Option<HttpResponse>> {
        let Self {
            frame_id,
            mode,
            pinned,
            timeout,
            deadline,
            mut signals,
            subscriptions,
        } = self;

        let mut state = WatchState::new(mode, pinned);
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, state.run(&mut signals))
                .await
                .unwrap_or_else(|_| Err(Error::timeout("Navigation", bound_to_millis(timeout)))),
            None => state.run(&mut signals).await,
        };
        drop(subscriptions);

        match &outcome {
            Ok(response) => debug!(
                frame = %frame_id,
                status = response.as_ref().map(|r| r.status),
                "Navigation resolved"
            ),
            Err(e) => debug!(frame = %frame_id, error = %e, "Navigation failed"),
        }
        outcome
    }
}

// ============================================================================
// WatchState
// ============================================================================

struct WatchState {
    mode: NavigationMode,
    pinned: bool,
    navigated: bool,
    tracked: Option<Arc<HttpRequest>>,
    decision: Option<Option<HttpResponse>>,
}

impl WatchState {
    fn new(mode: NavigationMode, pinned: bool) -> Self {
        Self {
            mode,
            pinned,
            navigated: false,
            tracked: None,
            decision: None,
        }
    }

    async fn run(
        &mut self,
        signals: &mut mpsc::UnboundedReceiver<WatchSignal>,
    ) -> Result<Option<HttpResponse>> {
        while let Some(signal) = signals.recv().await {
            if !self.apply(signal)? {
                continue;
            }
            while let Ok(queued) = signals.try_recv() {
                if let Some(error) = queued.termination() {
                    return Err(error);
                }
            }
            return Ok(self.decision.take().flatten());
        }
        Err(Error::navigation_terminated(DISCONNECTED))
    }

    /// Applies one signal; returns `true` once the watch can resolve.
    fn apply(&mut self, signal: WatchSignal) -> Result<bool> {
        if let Some(error) = signal.termination() {
            return Err(error);
        }

        if !self.pinned
            && self.mode == NavigationMode::SameDocument
            && matches!(
                signal,
                WatchSignal::NavigationStarted | WatchSignal::Navigated { same_document: false }
            )
        {
            self.mode = NavigationMode::CrossDocument;
        }

        match (self.mode, signal) {
            (NavigationMode::SameDocument, WatchSignal::Navigated { same_document: true }) => {
                self.navigated = true;
                self.decision = Some(None);
            }
            (NavigationMode::CrossDocument, WatchSignal::Navigated { same_document: false }) => {
                self.navigated = true;
                if self.tracked.is_none() && self.decision.is_none() {
                    self.decision = Some(None);
                }
            }
            (NavigationMode::CrossDocument, WatchSignal::Request(request)) => {
                if self.decision.is_none() && self.should_track(&request) {
                    self.tracked = Some(request);
                }
            }
            (NavigationMode::CrossDocument, WatchSignal::RequestFinished(request)) => {
                let is_tracked = self
                    .tracked
                    .as_ref()
                    .is_some_and(|tracked| Arc::ptr_eq(tracked, &request));
                if self.decision.is_none() && is_tracked {
                    match request.response() {
                        Some(response) if response.is_redirect() => {}
                        Some(response) => self.decision = Some(Some(response.clone())),
                        None => self.decision = Some(None),
                    }
                }
            }
            _ => {}
        }

        Ok(self.navigated && self.decision.is_some())
    }

    /// The first navigation request is tracked; later ones replace it only
    /// as redirect hops or after it finished with a redirect.
    fn should_track(&self, request: &HttpRequest) -> bool {
        match &self.tracked {
            None => true,
            Some(tracked) => {
                tracked.id() == request.id()
                    || tracked.response().is_some_and(HttpResponse::is_redirect)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
