//! View and message delivery to application handlers.
//!
//! Handlers run on the connection's reader task, in arrival order. A handler
//! must not block; hand work off to a channel or task instead.

use relay_core::{MessageEnvelope, View};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Something the relay pushed to this member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// New membership view of the joined cluster
    View(View),
    /// Message relayed from another member
    Message(MessageEnvelope),
}

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Publishes [`ClientEvent`]s to subscribers. Wrap in `Arc` to subscribe.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Subscribe to views only.
    pub fn on_view(self: &Arc<Self>, handler: impl Fn(&View) + Send + Sync + 'static) -> Subscription {
        self.subscribe(move |event| {
            if let ClientEvent::View(view) = event {
                handler(view);
            }
        })
    }

    /// Subscribe to relayed messages only.
    pub fn on_message(
        self: &Arc<Self>,
        handler: impl Fn(&MessageEnvelope) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(move |event| {
            if let ClientEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn unsubscribe(&self, id: usize) {
        // emit never holds the lock while a callback runs, so this cannot self-deadlock
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Deliver `event` to every subscriber.
    pub fn emit(&self, event: &ClientEvent) {
        // Snapshot so a callback may subscribe without deadlocking
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}
