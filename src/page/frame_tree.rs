//! Tree of browsing contexts.
//!
//! Nodes are keyed by [`FrameId`] and linked to their parent and children.
//! The tree is driven by attach, detach and navigation notifications and
//! emits a [`FrameEvent`] for each change.
//!
//! # Node Lifecycle
//!
//! ```text
//! unattached ──attach──► attached ──navigated──► attached ──detach──► removed
//!      │                                 ▲   │
//!      └─ buffered while parent unknown  └───┘
//! ```
//!
//! Detaching a node detaches its descendants first, children before
//! parents, with one [`FrameEvent::Detached`] per removed node.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::events::{EventEmitter, Subscription};
use crate::identifiers::{FrameId, NavigationId};
use crate::options::bound_to_millis;
use crate::protocol::{BidiEvent, ContextInfo};

// ============================================================================
// Frame
// ============================================================================

/// Snapshot of one context node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Context id.
    pub id: FrameId,
    /// Parent context id; `None` for a root.
    pub parent_id: Option<FrameId>,
    /// Current URL.
    pub url: String,
    /// Child context ids in attach order.
    pub children: Vec<FrameId>,
    /// Navigation currently loading in this context.
    pub navigation_id: Option<NavigationId>,
}

impl Frame {
    fn new(id: FrameId, parent_id: Option<FrameId>, url: String) -> Self {
        Self {
            id,
            parent_id,
            url,
            children: Vec::new(),
            navigation_id: None,
        }
    }

    /// Returns `true` for top-level contexts.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

// ============================================================================
// FrameEvent
// ============================================================================

/// Changes emitted by the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A node was added.
    Attached(Frame),
    /// A node was removed.
    Detached(Frame),
    /// A cross-document navigation started loading in a node.
    NavigationStarted {
        /// The node after the change.
        frame: Frame,
        /// Id of the loading navigation.
        navigation: NavigationId,
    },
    /// A node's URL changed.
    Navigated {
        /// The node after the change.
        frame: Frame,
        /// `true` for fragment and history navigations.
        same_document: bool,
    },
}

// ============================================================================
// FrameTree
// ============================================================================

#[derive(Default)]
struct TreeState {
    nodes: FxHashMap<FrameId, Frame>,
    roots: Vec<FrameId>,
    /// Children announced before their parent, keyed by parent id.
    buffered: FxHashMap<FrameId, Vec<ContextInfo>>,
    waiters: FxHashMap<FrameId, Vec<(u64, oneshot::Sender<Frame>)>>,
    next_waiter: u64,
}

/// Unregisters a frame waiter when its wait ends without the frame.
struct WaiterGuard {
    state: Arc<Mutex<TreeState>>,
    id: FrameId,
    key: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(waiters) = state.waiters.get_mut(&self.id) {
            waiters.retain(|(key, _)| *key != self.key);
            if waiters.is_empty() {
                state.waiters.remove(&self.id);
            }
        }
    }
}

/// Context tree for one page.
///
/// Cloning shares the tree.
#[derive(Clone, Default)]
pub struct FrameTree {
    state: Arc<Mutex<TreeState>>,
    emitter: EventEmitter<FrameEvent>,
}

impl std::fmt::Debug for FrameTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameTree")
            .field("nodes", &state.nodes.len())
            .field("roots", &state.roots)
            .finish()
    }
}

impl FrameTree {
    /// Creates an empty tree.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of a node.
    #[must_use]
    pub fn frame(&self, id: &FrameId) -> Option<Frame> {
        self.state.lock().nodes.get(id).cloned()
    }

    /// Returns `true` if the node is attached.
    #[must_use]
    pub fn contains(&self, id: &FrameId) -> bool {
        self.state.lock().nodes.contains_key(id)
    }

    /// Root node ids in attach order.
    #[must_use]
    pub fn roots(&self) -> Vec<FrameId> {
        self.state.lock().roots.clone()
    }

    /// Child ids of a node.
    #[must_use]
    pub fn children(&self, id: &FrameId) -> Vec<FrameId> {
        self.state
            .lock()
            .nodes
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// Number of attached nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Returns `true` if no node is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Navigation currently loading in a node.
    #[must_use]
    pub fn navigation_id(&self, id: &FrameId) -> Option<NavigationId> {
        self.state
            .lock()
            .nodes
            .get(id)
            .and_then(|node| node.navigation_id.clone())
    }

    /// Returns `true` if a cross-document navigation is loading in the node.
    #[must_use]
    pub fn has_pending_navigation(&self, id: &FrameId) -> bool {
        self.navigation_id(id).is_some()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Adds a node, or buffers it until its parent is known.
    ///
    /// Nested `children` (from a tree query) are attached too.
    pub fn attach(&self, info: ContextInfo) {
        let mut events = Vec::new();
        let mut ready = Vec::new();
        {
            let mut state = self.state.lock();
            Self::attach_locked(&mut state, info, &mut events, &mut ready);
        }

        for (waiters, frame) in ready {
            for (_, waiter) in waiters {
                let _ = waiter.send(frame.clone());
            }
        }
        for event in &events {
            self.emitter.emit(event);
        }
    }

    fn attach_locked(
        state: &mut TreeState,
        info: ContextInfo,
        events: &mut Vec<FrameEvent>,
        ready: &mut Vec<(Vec<(u64, oneshot::Sender<Frame>)>, Frame)>,
    ) {
        let ContextInfo {
            context,
            parent,
            url,
            children,
        } = info;

        if state.nodes.contains_key(&context) {
            trace!(%context, "Context already attached");
            return;
        }

        let missing_parent = parent
            .as_ref()
            .filter(|parent_id| !state.nodes.contains_key(*parent_id))
            .cloned();
        if let Some(parent_id) = missing_parent {
            debug!(%context, parent = %parent_id, "Buffering context until parent attaches");
            state
                .buffered
                .entry(parent_id)
                .or_default()
                .push(ContextInfo {
                    context,
                    parent,
                    url,
                    children,
                });
            return;
        }

        match &parent {
            Some(parent_id) => {
                if let Some(parent_node) = state.nodes.get_mut(parent_id) {
                    parent_node.children.push(context.clone());
                }
            }
            None => state.roots.push(context.clone()),
        }

        let frame = Frame::new(context.clone(), parent, url);
        state.nodes.insert(context.clone(), frame.clone());
        if let Some(waiters) = state.waiters.remove(&context) {
            ready.push((waiters, frame.clone()));
        }
        events.push(FrameEvent::Attached(frame));

        for child in children.unwrap_or_default() {
            let child = ContextInfo {
                parent: Some(context.clone()),
                ..child
            };
            Self::attach_locked(state, child, events, ready);
        }

        if let Some(pending) = state.buffered.remove(&context) {
            for child in pending {
                Self::attach_locked(state, child, events, ready);
            }
        }
    }

    /// Removes a node and all of its descendants, children first.
    pub fn detach(&self, id: &FrameId) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();

            if !state.nodes.contains_key(id) {
                for pending in state.buffered.values_mut() {
                    pending.retain(|info| &info.context != id);
                }
                state.buffered.retain(|_, pending| !pending.is_empty());
                return;
            }

            let mut order = Vec::new();
            Self::collect_post_order(&state, id, &mut order);

            for frame_id in order {
                let Some(frame) = state.nodes.remove(&frame_id) else {
                    continue;
                };
                match &frame.parent_id {
                    Some(parent_id) => {
                        if let Some(parent) = state.nodes.get_mut(parent_id) {
                            parent.children.retain(|child| child != &frame_id);
                        }
                    }
                    None => state.roots.retain(|root| root != &frame_id),
                }
                state.buffered.remove(&frame_id);
                events.push(FrameEvent::Detached(frame));
            }
        }

        for event in &events {
            self.emitter.emit(event);
        }
    }

    fn collect_post_order(state: &TreeState, id: &FrameId, order: &mut Vec<FrameId>) {
        if let Some(node) = state.nodes.get(id) {
            for child in &node.children {
                Self::collect_post_order(state, child, order);
            }
            order.push(id.clone());
        }
    }

    /// Updates a node's URL and emits a navigated event.
    ///
    /// Unknown ids are ignored.
    pub fn navigated(&self, id: &FrameId, url: &str, same_document: bool) {
        let frame = {
            let mut state = self.state.lock();
            let Some(node) = state.nodes.get_mut(id) else {
                return;
            };
            node.url = url.to_string();
            node.clone()
        };

        self.emitter.emit(&FrameEvent::Navigated {
            frame,
            same_document,
        });
    }

    /// Records the navigation loading in a node and emits a started event.
    ///
    /// Unknown ids are ignored.
    pub fn set_pending_navigation(&self, id: &FrameId, navigation: NavigationId) {
        let frame = {
            let mut state = self.state.lock();
            let Some(node) = state.nodes.get_mut(id) else {
                return;
            };
            node.navigation_id = Some(navigation.clone());
            node.clone()
        };

        self.emitter
            .emit(&FrameEvent::NavigationStarted { frame, navigation });
    }

    /// Clears the pending navigation if it matches (or if `navigation` is `None`).
    pub fn clear_pending_navigation(&self, id: &FrameId, navigation: Option<&NavigationId>) {
        if let Some(node) = self.state.lock().nodes.get_mut(id)
            && (navigation.is_none() || node.navigation_id.as_ref() == navigation)
        {
            node.navigation_id = None;
        }
    }

    /// Applies a newer-dialect event to the tree.
    pub fn handle_event(&self, event: &BidiEvent) {
        match event {
            BidiEvent::ContextCreated(info) => self.attach(info.clone()),
            BidiEvent::ContextDestroyed(info) => self.detach(&info.context),
            BidiEvent::NavigationStarted(nav) => {
                if let Some(navigation) = &nav.navigation {
                    self.set_pending_navigation(&nav.context, navigation.clone());
                }
            }
            BidiEvent::NavigationCommitted(nav) => self.navigated(&nav.context, &nav.url, false),
            BidiEvent::FragmentNavigated(nav) | BidiEvent::HistoryUpdated(nav) => {
                self.navigated(&nav.context, &nav.url, true);
            }
            BidiEvent::Load(nav)
            | BidiEvent::NavigationFailed(nav)
            | BidiEvent::NavigationAborted(nav) => {
                self.clear_pending_navigation(&nav.context, nav.navigation.as_ref());
            }
            _ => {}
        }
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Waits until a node with this id is attached.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the bound elapses first
    /// - [`Error::ChannelClosed`] if the tree is dropped while waiting
    pub async fn wait_for_frame(&self, id: &FrameId, timeout: Option<Duration>) -> Result<Frame> {
        let (rx, _guard) = {
            let mut state = self.state.lock();
            if let Some(frame) = state.nodes.get(id) {
                return Ok(frame.clone());
            }
            let (tx, rx) = oneshot::channel();
            let key = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.entry(id.clone()).or_default().push((key, tx));
            let guard = WaiterGuard {
                state: Arc::clone(&self.state),
                id: id.clone(),
                key,
            };
            (rx, guard)
        };

        let frame = match timeout {
            Some(bound) => tokio::time::timeout(bound, rx)
                .await
                .map_err(|_| Error::timeout("Waiting for frame", bound_to_millis(Some(bound))))??,
            None => rx.await?,
        };
        Ok(frame)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for tree changes.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        self.emitter.on(handler)
    }

    /// Number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.emitter.listener_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
