//! Typed Connector Event Bus
//!
//! A closed set of event variants fanned out synchronously to subscribers in
//! registration order, on the calling stack of whichever operation produced
//! the event. Listener panics are isolated so one misbehaving subscriber
//! cannot starve the rest.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::ConnectorError;
use crate::session::{ConnectorId, SessionAccount};
use crate::types::{now_ms, Cluster, TxStatus, WalletDescriptor};

/// One event on the connector stream, stamped at construction
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorEvent {
    /// Unix-millisecond timestamp
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl ConnectorEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: now_ms(),
            payload,
        }
    }

    pub fn category(&self) -> &'static str {
        self.payload.category()
    }
}

/// Closed set of event variants emitted by the connector
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum EventPayload {
    /// A wallet session was established
    WalletConnected {
        connector_id: ConnectorId,
        accounts: Vec<SessionAccount>,
    },
    /// The active session was torn down
    WalletDisconnected { connector_id: ConnectorId },
    /// The set of discoverable wallets changed
    WalletsChanged { wallets: Vec<WalletDescriptor> },
    /// The selected account changed
    AccountChanged { address: String },
    /// The persisted cluster preference changed
    ClusterChanged { cluster: Cluster },
    /// A transaction entered the tracker
    TransactionTracked { signature: String },
    /// A tracked transaction changed status
    TransactionUpdated { signature: String, status: TxStatus },
    /// A storage backend failure was recovered via the memory fallback
    StorageFallback {
        key: String,
        error: ConnectorError,
    },
    /// A connect or provider operation failed
    Error {
        error: ConnectorError,
        recoverable: bool,
    },
}

impl EventPayload {
    /// Category string in the `<domain>:<kind>` form
    pub fn category(&self) -> &'static str {
        match self {
            EventPayload::WalletConnected { .. } => "wallet:connected",
            EventPayload::WalletDisconnected { .. } => "wallet:disconnected",
            EventPayload::WalletsChanged { .. } => "wallet:registry-changed",
            EventPayload::AccountChanged { .. } => "account:changed",
            EventPayload::ClusterChanged { .. } => "cluster:changed",
            EventPayload::TransactionTracked { .. } => "transaction:tracked",
            EventPayload::TransactionUpdated { .. } => "transaction:updated",
            EventPayload::StorageFallback { .. } => "storage:fallback",
            EventPayload::Error { .. } => "error",
        }
    }
}

/// RAII unsubscribe handle
///
/// Dropping the handle removes the listener; call [`Subscription::detach`]
/// to keep the listener registered for the lifetime of the bus instead.
pub struct Subscription(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription(Some(Box::new(unsubscribe)))
    }

    /// A handle that unsubscribes nothing
    pub fn noop() -> Self {
        Subscription(None)
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }

    /// Keep the listener registered forever
    pub fn detach(mut self) {
        self.0 = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.0.is_some())
            .finish()
    }
}

type Listener = Arc<dyn Fn(&ConnectorEvent) + Send + Sync>;

#[derive(Default)]
struct DispatcherInner {
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

/// Subscriber registry with synchronous fan-out
///
/// Cheap to clone; clones share the same listener set. The listener list is
/// snapshotted before fan-out, so a listener may subscribe, unsubscribe or
/// call back into the emitting component without deadlocking.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Mutex<DispatcherInner>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; delivery follows registration order
    pub fn on(&self, listener: impl Fn(&ConnectorEvent) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Arc::new(listener)));
            id
        };
        let weak: Weak<Mutex<DispatcherInner>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Stamp and deliver an event to every current subscriber
    pub fn emit(&self, payload: EventPayload) {
        let event = ConnectorEvent::new(payload);
        let listeners: Vec<Listener> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(category = event.category(), "event listener panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Bridge the bus into an async stream; dropping the stream unsubscribes
    pub fn stream(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.on(move |event| {
            let _ = tx.send(event.clone());
        });
        EventStream {
            rx,
            _subscription: subscription,
        }
    }
}

fn lock(inner: &Arc<Mutex<DispatcherInner>>) -> std::sync::MutexGuard<'_, DispatcherInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Async view of the event bus
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ConnectorEvent>,
    _subscription: Subscription,
}

impl Stream for EventStream {
    type Item = ConnectorEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn account_event(address: &str) -> EventPayload {
        EventPayload::AccountChanged {
            address: address.to_string(),
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _a = dispatcher.on(move |_| first.lock().expect("lock").push("a"));
        let second = seen.clone();
        let _b = dispatcher.on(move |_| second.lock().expect("lock").push("b"));

        dispatcher.emit(account_event("Addr1"));
        assert_eq!(*seen.lock().expect("lock"), vec!["a", "b"]);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let sub = dispatcher.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.emit(account_event("Addr1"));
        drop(sub);
        dispatcher.emit(account_event("Addr2"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_delivery() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = dispatcher.on(|_| panic!("listener bug"));
        let counter = count.clone();
        let _good = dispatcher.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(account_event("Addr1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_subscription_during_dispatch() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let reentrant = dispatcher.clone();
        let counter = count.clone();
        let sub = dispatcher.on(move |_| {
            let counter = counter.clone();
            // Subscribing mid-dispatch must not deadlock; the new listener
            // only sees later events.
            reentrant
                .on(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .detach();
        });

        dispatcher.emit(account_event("Addr1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sub.unsubscribe();
        dispatcher.emit(account_event("Addr2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stream_receives_events() {
        tokio_test::block_on(async {
            let dispatcher = EventDispatcher::new();
            let mut stream = dispatcher.stream();

            dispatcher.emit(account_event("Addr1"));
            let event = stream.next().await.expect("event");
            assert_eq!(event.category(), "account:changed");
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = ConnectorEvent::new(EventPayload::TransactionUpdated {
            signature: "sig1".to_string(),
            status: TxStatus::Confirmed,
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "transaction-updated");
        assert_eq!(json["data"]["status"], "confirmed");
    }
}
