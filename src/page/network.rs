//! Network correlation table.
//!
//! Tracks in-flight requests by [`NetworkId`], folds redirect hops into a
//! chain, and binds committed navigations to their responses.
//!
//! # Event Mapping
//!
//! | Browser event | Table effect | Emitted |
//! |---------------|--------------|---------|
//! | `network.beforeRequestSent` | insert; a known id becomes a redirect hop | `Request` |
//! | `network.responseCompleted` | attach response; bind navigation id | `Response`, `RequestServedFromCache`?, `RequestFinished` |
//! | `network.fetchError` | attach failure text | `RequestFailed` |
//! | context destroyed | purge the frame's records and bindings | none |

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::events::{EventEmitter, Subscription};
use crate::identifiers::{FrameId, NavigationId, NetworkId};
use crate::protocol::{BeforeRequestSent, BidiEvent, FetchError, ResponseCompleted};

// ============================================================================
// HttpResponse
// ============================================================================

/// A completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Final URL.
    pub url: String,
    /// HTTP status.
    pub status: u16,
    /// HTTP status text.
    pub status_text: String,
    /// Served from cache.
    pub from_cache: bool,
    /// MIME type.
    pub mime_type: String,
}

impl HttpResponse {
    /// Returns `true` for status 0 or 2xx.
    #[inline]
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status == 0 || (200..300).contains(&self.status)
    }

    /// Returns `true` for 3xx statuses other than 304.
    #[inline]
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.status != 304
    }
}

// ============================================================================
// HttpRequest
// ============================================================================

/// One hop of a network request.
///
/// A request is final once it has a response or a failure text; both are
/// written at most once.
#[derive(Debug)]
pub struct HttpRequest {
    id: NetworkId,
    frame_id: Option<FrameId>,
    navigation_id: Option<NavigationId>,
    url: String,
    method: String,
    redirect_chain: Vec<Arc<HttpRequest>>,
    response: OnceLock<HttpResponse>,
    failure_text: OnceLock<String>,
}

impl HttpRequest {
    fn from_event(event: &BeforeRequestSent, redirect_chain: Vec<Arc<HttpRequest>>) -> Self {
        Self {
            id: event.request.request.clone(),
            frame_id: event.context.clone(),
            navigation_id: event.navigation.clone(),
            url: event.request.url.clone(),
            method: event.request.method.clone(),
            redirect_chain,
            response: OnceLock::new(),
            failure_text: OnceLock::new(),
        }
    }

    /// Network id, shared by every hop of a redirect chain.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Context that issued the request.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> Option<&FrameId> {
        self.frame_id.as_ref()
    }

    /// Navigation the request belongs to.
    #[inline]
    #[must_use]
    pub fn navigation_id(&self) -> Option<&NavigationId> {
        self.navigation_id.as_ref()
    }

    /// Request URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns `true` if the request loads a document for a navigation.
    #[inline]
    #[must_use]
    pub fn is_navigation_request(&self) -> bool {
        self.navigation_id.is_some()
    }

    /// Earlier hops, oldest first.
    #[inline]
    #[must_use]
    pub fn redirect_chain(&self) -> &[Arc<HttpRequest>] {
        &self.redirect_chain
    }

    /// Response, once completed.
    #[inline]
    #[must_use]
    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.get()
    }

    /// Failure text, once failed.
    #[inline]
    #[must_use]
    pub fn failure_text(&self) -> Option<&str> {
        self.failure_text.get().map(String::as_str)
    }

    /// Returns `true` once the request has a response or a failure.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.response.get().is_some() || self.failure_text.get().is_some()
    }
}

// ============================================================================
// NetworkEvent
// ============================================================================

/// Events emitted by the [`NetworkManager`].
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A request (or redirect hop) was issued.
    Request(Arc<HttpRequest>),
    /// A response arrived.
    Response(Arc<HttpRequest>),
    /// The request completed with a response.
    RequestFinished(Arc<HttpRequest>),
    /// The request failed.
    RequestFailed(Arc<HttpRequest>),
    /// The response came from cache.
    RequestServedFromCache(Arc<HttpRequest>),
}

// ============================================================================
// NetworkManager
// ============================================================================

#[derive(Default)]
struct NetworkState {
    requests: FxHashMap<NetworkId, Arc<HttpRequest>>,
    navigations: FxHashMap<NavigationId, Arc<HttpRequest>>,
}

/// In-flight request table for one page.
///
/// Cloning shares the table.
#[derive(Clone, Default)]
pub struct NetworkManager {
    state: Arc<Mutex<NetworkState>>,
    emitter: EventEmitter<NetworkEvent>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NetworkManager")
            .field("requests", &state.requests.len())
            .field("navigations", &state.navigations.len())
            .finish()
    }
}

impl NetworkManager {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest hop recorded for a network id.
    #[must_use]
    pub fn request(&self, id: &NetworkId) -> Option<Arc<HttpRequest>> {
        self.state.lock().requests.get(id).cloned()
    }

    /// Response bound to a committed navigation.
    #[must_use]
    pub fn navigation_response(&self, navigation: &NavigationId) -> Option<HttpResponse> {
        self.state
            .lock()
            .navigations
            .get(navigation)
            .and_then(|request| request.response().cloned())
    }

    /// Number of requests with neither a response nor a failure.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state
            .lock()
            .requests
            .values()
            .filter(|request| !request.is_finished())
            .count()
    }

    /// Number of tracked requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Returns `true` if no request is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a request; a known id becomes the next redirect hop.
    pub fn on_before_request_sent(&self, event: &BeforeRequestSent) -> Arc<HttpRequest> {
        let request = {
            let mut state = self.state.lock();
            let redirect_chain = match state.requests.get(&event.request.request) {
                Some(previous) => {
                    let mut chain = previous.redirect_chain.clone();
                    chain.push(Arc::clone(previous));
                    chain
                }
                None => Vec::new(),
            };
            let request = Arc::new(HttpRequest::from_event(event, redirect_chain));
            state
                .requests
                .insert(request.id.clone(), Arc::clone(&request));
            request
        };

        trace!(id = %request.id, url = %request.url, hops = request.redirect_chain.len(), "Request");
        self.emitter.emit(&NetworkEvent::Request(Arc::clone(&request)));
        request
    }

    /// Attaches a response to its request.
    pub fn on_response_completed(&self, event: &ResponseCompleted) {
        let response = HttpResponse {
            url: event.response.url.clone(),
            status: event.response.status,
            status_text: event.response.status_text.clone(),
            from_cache: event.response.from_cache,
            mime_type: event.response.mime_type.clone(),
        };

        let request = {
            let mut state = self.state.lock();
            let Some(request) = state.requests.get(&event.request.request).cloned() else {
                debug!(id = %event.request.request, "Response for unknown request");
                return;
            };
            if request.response.set(response).is_err() {
                trace!(id = %request.id, "Duplicate response ignored");
                return;
            }
            match &event.navigation {
                Some(navigation) => {
                    state
                        .navigations
                        .insert(navigation.clone(), Arc::clone(&request));
                }
                None if request.response().is_some_and(HttpResponse::is_redirect) => {}
                None => Self::forget_locked(&mut state, &request),
            }
            request
        };

        self.emitter
            .emit(&NetworkEvent::Response(Arc::clone(&request)));
        if request.response().is_some_and(|response| response.from_cache) {
            self.emitter
                .emit(&NetworkEvent::RequestServedFromCache(Arc::clone(&request)));
        }
        self.emitter.emit(&NetworkEvent::RequestFinished(request));
    }

    /// Attaches a failure to its request.
    pub fn on_fetch_error(&self, event: &FetchError) {
        let request = {
            let mut state = self.state.lock();
            let Some(request) = state.requests.get(&event.request.request).cloned() else {
                debug!(id = %event.request.request, "Failure for unknown request");
                return;
            };
            if request.failure_text.set(event.error_text.clone()).is_err() {
                return;
            }
            Self::forget_locked(&mut state, &request);
            request
        };
        self.emitter.emit(&NetworkEvent::RequestFailed(request));
    }

    /// Drops a finished request that no navigation can still ask for.
    ///
    /// Navigation requests stay until their frame is cleared.
    fn forget_locked(state: &mut NetworkState, request: &Arc<HttpRequest>) {
        if request.is_navigation_request() {
            return;
        }
        if state
            .requests
            .get(&request.id)
            .is_some_and(|current| Arc::ptr_eq(current, request))
        {
            state.requests.remove(&request.id);
        }
    }

    /// Drops every record and navigation binding owned by a frame.
    pub fn clear_for_frame(&self, frame: &FrameId) {
        let mut state = self.state.lock();
        let owned = |request: &Arc<HttpRequest>| request.frame_id.as_ref() == Some(frame);
        state.requests.retain(|_, request| !owned(request));
        state.navigations.retain(|_, request| !owned(request));
    }

    /// Applies a newer-dialect network event.
    pub fn handle_event(&self, event: &BidiEvent) {
        match event {
            BidiEvent::BeforeRequestSent(event) => {
                self.on_before_request_sent(event);
            }
            BidiEvent::ResponseCompleted(event) => self.on_response_completed(event),
            BidiEvent::FetchError(event) => self.on_fetch_error(event),
            _ => {}
        }
    }

    /// Registers a listener for network events.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
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
