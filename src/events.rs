//! Synchronous event fan-out with RAII subscriptions.
//!
//! Every emitter in the crate (connections, sessions, the frame tree, the
//! network table) is an [`EventEmitter`]. Listeners are registered with
//! [`EventEmitter::on`], which returns a [`Subscription`]; dropping the
//! subscription (or calling [`Subscription::close`]) unregisters the
//! listener. There is no way to register a listener without holding its
//! subscription, so a forgotten listener is a visible leak in the owner's
//! fields rather than a silent one.
//!
//! # Example
//!
//! ```ignore
//! let emitter = EventEmitter::<u32>::new();
//! let sub = emitter.on(|value| println!("got {value}"));
//! emitter.emit(&7);
//! drop(sub);
//! assert_eq!(emitter.listener_count(), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

// ============================================================================
// Types
// ============================================================================

/// Listener callback type.
type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct EmitterInner<E> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<E>)>>,
}

// ============================================================================
// EventEmitter
// ============================================================================

/// Multi-listener event emitter.
///
/// Cloning shares the listener list. Listeners run synchronously inside
/// [`emit`](Self::emit), in registration order, outside the internal lock,
/// so a listener may register or drop subscriptions while being called.
pub struct EventEmitter<E> {
    inner: Arc<EmitterInner<E>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                next_id: AtomicU64::new(0),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<E: 'static> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: 'static> EventEmitter<E> {
    /// Creates an emitter with no listeners.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its subscription.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.lock().push((id, Arc::new(handler)));

        let weak: Weak<EmitterInner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handlers.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Delivers an event to every registered listener.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    /// Drops every listener. Outstanding subscriptions become no-ops.
    pub fn remove_all_listeners(&self) {
        self.inner.handlers.lock().clear();
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// RAII handle for a registered listener.
///
/// The listener is removed exactly once: on [`close`](Self::close) or drop,
/// whichever comes first.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Unregisters the listener now.
    pub fn close(mut self) {
        self.release();
    }

    /// Returns `true` until the listener has been unregistered.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let emitter = EventEmitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _sub_a = emitter.on(move |v| a.lock().push(("a", *v)));
        let b = Arc::clone(&seen);
        let _sub_b = emitter.on(move |v| b.lock().push(("b", *v)));

        emitter.emit(&1);
        assert_eq!(*seen.lock(), vec![("a", 1), ("b", 1)]);
    }

    #[test]
    fn test_debug_shows_listener_count() {
        let emitter = EventEmitter::<u32>::new();
        let _sub = emitter.on(|_| {});

        assert_eq!(format!("{emitter:?}"), "EventEmitter { listeners: 1 }");
    }

    #[test]
    fn test_drop_unregisters() {
        let emitter = EventEmitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = emitter.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&());
        drop(sub);
        emitter.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_close_only_removes_own_listener() {
        let emitter = EventEmitter::<()>::new();
        let first = emitter.on(|_| {});
        let _second = emitter.on(|_| {});

        first.close();
        assert_eq!(emitter.listener_count(), 1);
    }

    #[test]
    fn test_subscription_outlives_emitter() {
        let emitter = EventEmitter::<()>::new();
        let sub = emitter.on(|_| {});
        drop(emitter);
        drop(sub);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let emitter = EventEmitter::<()>::new();
        let nested = Arc::new(Mutex::new(Vec::new()));

        let inner_emitter = emitter.clone();
        let store = Arc::clone(&nested);
        let _sub = emitter.on(move |_| {
            store.lock().push(inner_emitter.on(|_| {}));
        });

        emitter.emit(&());
        assert_eq!(emitter.listener_count(), 2);
    }
}
