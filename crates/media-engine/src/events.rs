//! Player event bus.
//!
//! Handlers run synchronously on the publishing task, in subscription order. Dispatch works on a
//! snapshot of the subscriber list, so handlers may subscribe, unsubscribe (themselves
//! included) or issue player commands without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError, unbounded};
use tokio::time::Instant;

use media_engine_types::PlayerEvent;

type Handler = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Identifies one subscription on a bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

impl BusInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`. The subscription ends when the returned guard is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe through an unbounded channel, for consumers on other threads.
    pub fn subscribe_channel(&self) -> EventReceiver {
        let (tx, rx) = unbounded();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        EventReceiver { rx, subscription }
    }

    /// Remove a subscription by id. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every current subscriber.
    pub fn publish(&self, event: &PlayerEvent) {
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        if !event.is_progress() {
            tracing::trace!(?event, subscribers = handlers.len(), "publish");
        }
        for handler in handlers {
            handler(event);
        }
    }
}

/// Guard for a bus subscription.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

/// Channel-backed subscription returned by [`EventBus::subscribe_channel`].
pub struct EventReceiver {
    rx: Receiver<PlayerEvent>,
    subscription: Subscription,
}

impl EventReceiver {
    pub fn recv(&self) -> Option<PlayerEvent> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<PlayerEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything received so far.
    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.rx.try_iter().collect()
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }
}

/// Coalesces position updates so at most one progress event goes out per interval.
///
/// The newest position always wins. Callers flush pending progress before publishing a
/// discrete event so observers never see progress out of order.
pub(crate) struct ProgressCoalescer {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<PlayerEvent>,
}

impl ProgressCoalescer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    /// Offer a position. Returns the event to publish now, if the interval has elapsed.
    pub(crate) fn offer(
        &mut self,
        now: Instant,
        elapsed_ms: u64,
        duration_ms: Option<u64>,
    ) -> Option<PlayerEvent> {
        let event = PlayerEvent::Progress {
            elapsed_ms,
            duration_ms,
        };
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => {
                self.pending = Some(event);
                None
            }
            _ => {
                self.last_emit = Some(now);
                self.pending = None;
                Some(event)
            }
        }
    }

    /// When the pending update becomes due.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        self.last_emit.map(|last| last + self.interval)
    }

    /// Emit unconditionally (seek), replacing anything pending.
    pub(crate) fn force(&mut self, now: Instant, elapsed_ms: u64, duration_ms: Option<u64>) -> PlayerEvent {
        self.pending = None;
        self.last_emit = Some(now);
        PlayerEvent::Progress {
            elapsed_ms,
            duration_ms,
        }
    }

    pub(crate) fn flush(&mut self, now: Instant) -> Option<PlayerEvent> {
        let event = self.pending.take()?;
        self.last_emit = Some(now);
        Some(event)
    }

    /// Drop pending progress and restart the interval (new playback session).
    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.last_emit = None;
    }
}
