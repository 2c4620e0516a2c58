//! Request/response correlation table.
//!
//! Every outgoing command gets a [`CallId`] and a pending entry holding the
//! sending half of a oneshot channel. Incoming responses settle entries by
//! id; unknown ids are ignored so late or duplicate responses are harmless.
//!
//! # Lifecycle
//!
//! | Event | Effect on entry |
//! |-------|-----------------|
//! | `create` | inserted, request function runs synchronously |
//! | request function fails | removed, same future yields the error |
//! | `resolve` / `reject` | removed, future settles |
//! | timeout | removed, future yields [`Error::RequestTimeout`] |
//! | future dropped | removed by the call guard |
//! | `clear` | all removed, futures yield [`Error::TargetClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{CallId, IdGenerator};
use crate::options::bound_to_millis;

// ============================================================================
// Types
// ============================================================================

/// A pending call awaiting its response.
struct Callback {
    label: String,
    tx: oneshot::Sender<Result<Value>>,
}

type CallbackMap = FxHashMap<CallId, Callback>;

// ============================================================================
// CallbackRegistry
// ============================================================================

/// Correlates outgoing requests with their eventual responses.
///
/// Cloning shares the table.
#[derive(Clone)]
pub struct CallbackRegistry {
    callbacks: Arc<Mutex<CallbackMap>>,
    ids: IdGenerator,
    raw_errors: bool,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pending", &self.pending_count())
            .field("raw_errors", &self.raw_errors)
            .finish()
    }
}

impl CallbackRegistry {
    /// Creates a registry with its own id counter.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_ids(IdGenerator::new(), false)
    }

    /// Creates a registry drawing ids from a shared counter.
    #[inline]
    #[must_use]
    pub fn with_ids(ids: IdGenerator, raw_errors: bool) -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(CallbackMap::default())),
            ids,
            raw_errors,
        }
    }

    /// Registers a pending call and runs `request` with its id.
    ///
    /// The entry exists before `request` runs, so a response can never
    /// arrive for an unregistered id. If `request` fails, the entry is
    /// removed and the returned future yields that error.
    ///
    /// The deadline starts now, not when the future is first polled.
    pub fn create<F>(
        &self,
        label: impl Into<String>,
        timeout: Option<Duration>,
        request: F,
    ) -> PendingCall
    where
        F: FnOnce(CallId) -> Result<()>,
    {
        let label = label.into();
        let id = self.ids.next_id();
        let deadline = timeout.map(|bound| (Instant::now() + bound, bound));

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(
            id,
            Callback {
                label: label.clone(),
                tx,
            },
        );

        let sent = request(id);
        if sent.is_err() {
            self.callbacks.lock().remove(&id);
        }

        let guard = CallGuard {
            id,
            callbacks: Arc::clone(&self.callbacks),
        };

        let future = async move {
            let _guard = guard;
            sent?;

            let outcome = match deadline {
                Some((at, bound)) => match timeout_at(at, rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(%id, label = %label, "Call timed out");
                        return Err(Error::request_timeout(label, bound_to_millis(Some(bound))));
                    }
                },
                None => rx.await,
            };

            match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::target_closed(format!(
                    "Protocol error ({label}): Target closed"
                ))),
            }
        };

        PendingCall {
            id,
            future: Box::pin(future),
        }
    }

    /// Resolves a pending call. Unknown ids are ignored.
    pub fn resolve(&self, id: CallId, value: Value) {
        let Some(callback) = self.callbacks.lock().remove(&id) else {
            trace!(%id, "Resolve for unknown call");
            return;
        };
        let _ = callback.tx.send(Ok(value));
    }

    /// Rejects a pending call with a protocol error. Unknown ids are ignored.
    pub fn reject(&self, id: CallId, message: &str, original_message: Option<String>) {
        self.reject_with_code(id, None, message, original_message);
    }

    /// Rejects a pending call, keeping the browser's numeric error code.
    pub fn reject_with_code(
        &self,
        id: CallId,
        code: Option<i64>,
        message: &str,
        original_message: Option<String>,
    ) {
        let Some(callback) = self.callbacks.lock().remove(&id) else {
            trace!(%id, "Reject for unknown call");
            return;
        };

        let message = if self.raw_errors {
            message.to_string()
        } else {
            format!("Protocol error ({}): {}", callback.label, message)
        };

        let _ = callback.tx.send(Err(Error::Protocol {
            message,
            original_message,
            code,
        }));
    }

    /// Rejects every pending call with a target-closed error.
    ///
    /// Safe to call repeatedly; the table is empty afterwards.
    pub fn clear(&self) {
        let pending: Vec<(CallId, Callback)> = self.callbacks.lock().drain().collect();
        let count = pending.len();

        for (_, callback) in pending {
            let _ = callback.tx.send(Err(Error::target_closed(format!(
                "Protocol error ({}): Target closed",
                callback.label
            ))));
        }

        if count > 0 {
            debug!(count, "Rejected pending calls");
        }
    }

    /// Number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Labels of pending calls, oldest first.
    #[must_use]
    pub fn pending_labels(&self) -> Vec<String> {
        let callbacks = self.callbacks.lock();
        let mut entries: Vec<(&CallId, &Callback)> = callbacks.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries
            .into_iter()
            .map(|(_, callback)| callback.label.clone())
            .collect()
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// Future returned by [`CallbackRegistry::create`].
///
/// Dropping it before it settles removes the registry entry.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    id: CallId,
    future: BoxFuture<'static, Result<Value>>,
}

impl PendingCall {
    /// Id assigned to the call.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish()
    }
}

// ============================================================================
// CallGuard
// ============================================================================

/// Removes the entry when the awaiting future goes away.
struct CallGuard {
    id: CallId,
    callbacks: Arc<Mutex<CallbackMap>>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.callbacks.lock().remove(&self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
