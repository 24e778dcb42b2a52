//! Refresh coordination.
//!
//! One refresh at a time: calls arriving while a refresh is in flight,
//! or within the minimum interval of the previous start, are dropped
//! rather than queued; the most recent completed refresh wins. The
//! printed-flag merge strictly precedes publication, so no observer
//! ever sees a printed order regress to unprinted because the store
//! hasn't caught up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::RemoteOrderSource;
use crate::cache::OrderCache;
use crate::model::{Order, OrderId};
use crate::state::StateCells;
use crate::status::OrderStatus;

/// Minimum spacing between refresh starts.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// What became of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetch + merge + publish completed; `count` orders arrived.
    Completed { count: usize },
    /// Dropped by the debounce or the in-flight guard.
    Skipped,
    /// Remote fetch failed; the previous list was preserved.
    Failed,
}

// ---------------------------------------------------------------------------
// Print-state guard
// ---------------------------------------------------------------------------

/// Re-apply locally known printed flags onto freshly fetched orders.
///
/// "Printed" is recorded client-side before the server round-trips, so a
/// fetch may report `false` for an order this terminal already printed.
/// Any id previously `true` is forced back to `true`; everything else
/// passes through unchanged.
pub fn restore_printed_flags(
    previous: &HashMap<OrderId, bool>,
    fresh: Vec<Order>,
) -> Vec<Order> {
    let mut restored = 0usize;
    let corrected: Vec<Order> = fresh
        .into_iter()
        .map(|mut order| {
            if !order.is_printed && previous.get(&order.id).copied().unwrap_or(false) {
                order.is_printed = true;
                restored += 1;
            }
            order
        })
        .collect();
    if restored > 0 {
        warn!(restored, "printed flags regressed in fetch, restored from local state");
    }
    corrected
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct RefreshCoordinator {
    source: Arc<dyn RemoteOrderSource>,
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
    min_interval: Duration,
    in_flight: AtomicBool,
    last_start: Mutex<Option<Instant>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn RemoteOrderSource>,
        cache: Arc<dyn OrderCache>,
        cells: Arc<StateCells>,
    ) -> Self {
        RefreshCoordinator {
            source,
            cache,
            cells,
            min_interval: MIN_REFRESH_INTERVAL,
            in_flight: AtomicBool::new(false),
            last_start: Mutex::new(None),
        }
    }

    /// Acquire the refresh slot, or report why the request is dropped.
    fn try_begin(&self) -> bool {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("refresh already in flight, dropping request");
            return false;
        }
        let mut last_start = self.last_start.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        if let Some(last) = *last_start {
            if now.duration_since(last) < self.min_interval {
                debug!(
                    elapsed_ms = now.duration_since(last).as_millis() as u64,
                    "refresh requested inside debounce interval, dropping"
                );
                self.in_flight.store(false, Ordering::SeqCst);
                return false;
            }
        }
        *last_start = Some(now);
        true
    }

    /// Fetch the remote order list, merge local print state, persist,
    /// and publish.
    ///
    /// On failure the error slot is set and the previously published
    /// list stays up: stale-but-available beats empty. Retry is the
    /// caller's decision.
    pub async fn refresh(&self, filter: Option<OrderStatus>) -> RefreshOutcome {
        if !self.try_begin() {
            return RefreshOutcome::Skipped;
        }

        self.cells.set_refreshing(true);
        self.cells.set_loading(true);

        let outcome = self.run(filter).await;

        self.cells.set_loading(false);
        self.cells.set_refreshing(false);
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run(&self, filter: Option<OrderStatus>) -> RefreshOutcome {
        // Snapshot printed flags before the fetch: the published list
        // first (it may carry flags not yet persisted), then the cache
        // for orders outside the current view.
        let mut printed: HashMap<OrderId, bool> = self
            .cells
            .orders_snapshot()
            .iter()
            .map(|o| (o.id, o.is_printed))
            .collect();
        match self.cache.printed_flags() {
            Ok(flags) => {
                for (id, flag) in flags {
                    printed.entry(id).or_insert(flag);
                }
            }
            Err(e) => warn!(error = %e, "printed-flag snapshot from cache failed"),
        }

        let fresh = match self.source.fetch_orders(filter).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "order refresh failed");
                self.cells.set_error(e.to_string());
                return RefreshOutcome::Failed;
            }
        };

        let merged = restore_printed_flags(&printed, fresh);

        // Persist before publishing so cache-driven subscriptions see the
        // same merged view. The upsert preserves read state and never
        // lowers a printed flag.
        if let Err(e) = self.cache.upsert_orders(&merged, false) {
            warn!(error = %e, "cache upsert after refresh failed");
        }

        let count = merged.len();
        // A scoped fetch covers one status only; publishing it directly
        // would clobber the unfiltered view. The filter subscription
        // republishes from the cache instead.
        if filter.is_none() {
            self.cells.publish_orders(merged);
        }
        self.cells.clear_error();
        info!(count, filter = filter.map(|s| s.as_str()), "refresh completed");
        RefreshOutcome::Completed { count }
    }
}
