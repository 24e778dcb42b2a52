//! Background order polling.
//!
//! A boundary adapter: it never touches the published state. Each cycle
//! fetches orders created since the previous check, lands them in the
//! cache (new ones unread), and emits a poll event; the reconciler's
//! listener decides how to refresh. Poll failures are absorbed: the
//! next cycle retries anyway, and a background error must not occupy
//! the user-facing error slot.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::RemoteOrderSource;
use crate::cache::OrderCache;
use crate::events::{EventBus, PollEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct OrderPoller {
    source: Arc<dyn RemoteOrderSource>,
    cache: Arc<dyn OrderCache>,
    bus: EventBus,
    interval: Duration,
    is_running: AtomicBool,
    shutdown: CancellationToken,
    last_checked: Mutex<DateTime<Utc>>,
}

impl OrderPoller {
    pub fn new(
        source: Arc<dyn RemoteOrderSource>,
        cache: Arc<dyn OrderCache>,
        bus: EventBus,
        interval: Duration,
    ) -> Self {
        OrderPoller {
            source,
            cache,
            bus,
            interval,
            is_running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            last_checked: Mutex::new(Utc::now()),
        }
    }

    /// Spawn the polling loop. Returns false when already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("order poller already running");
            return false;
        }
        info!(interval_secs = self.interval.as_secs(), "order poller starting");
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = poller.shutdown.cancelled() => {
                        info!("order poller stopped");
                        break;
                    }
                    _ = tokio::time::sleep(poller.interval) => {
                        poller.poll_once().await;
                    }
                }
            }
            poller.is_running.store(false, Ordering::SeqCst);
        });
        true
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// One polling cycle: fetch-since, cache, emit.
    pub async fn poll_once(&self) {
        let since = *self
            .last_checked
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let cycle_started = Utc::now();

        let orders = match self.source.fetch_orders_since(since).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "order poll failed");
                return;
            }
        };

        *self
            .last_checked
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = cycle_started;

        if orders.is_empty() {
            return;
        }

        let new_ids = match self.cache.upsert_orders(&orders, true) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "caching polled orders failed");
                return;
            }
        };

        if new_ids.is_empty() {
            debug!(count = orders.len(), "poll cycle updated known orders");
            self.bus.emit_poll(PollEvent::OrdersUpdated);
        } else {
            info!(count = new_ids.len(), "poll cycle found new orders");
            self.bus.emit_poll(PollEvent::NewOrdersReceived {
                count: new_ids.len(),
            });
        }
    }
}
