//! Event channels.
//!
//! The polling service (or any other boundary adapter) publishes
//! `PollEvent`s here instead of holding a reference to the reconciler;
//! the reconciler runs one listener task per bus. Notifications flow the
//! other way: one-shot facts the UI may toast and drop.

use tokio::sync::broadcast;

use crate::model::OrderId;

const CHANNEL_CAPACITY: usize = 32;

/// Triggers emitted at the system boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// Known orders changed upstream; refresh under the current filter.
    OrdersUpdated,
    /// Orders never seen before arrived.
    NewOrdersReceived { count: usize },
}

/// One-shot, user-facing facts. Lossy by design: a slow or absent UI
/// subscriber must never block reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StatusChanged {
        order_id: OrderId,
        number: String,
        new_status: String,
    },
    OrderPrinted { order_id: OrderId },
}

/// Broadcast bus shared by boundary adapters and the reconciler.
#[derive(Clone)]
pub struct EventBus {
    poll_tx: broadcast::Sender<PollEvent>,
    notify_tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new() -> Self {
        let (poll_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (notify_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { poll_tx, notify_tx }
    }

    pub fn emit_poll(&self, event: PollEvent) {
        // Send fails only with zero subscribers, which is fine.
        let _ = self.poll_tx.send(event);
    }

    pub fn subscribe_poll(&self) -> broadcast::Receiver<PollEvent> {
        self.poll_tx.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
