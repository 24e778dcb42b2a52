//! Status filter observation.
//!
//! At most one subscription task is live at a time: selecting a new
//! filter cancels the previous task before starting the next, so two
//! data sources never compete for the published list. A freshly selected
//! filter holds an empty-result grace window: a scoped refresh may not
//! have landed in the cache yet, and a "no matching orders" verdict
//! inside that window would be premature.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::OrderCache;
use crate::state::StateCells;
use crate::status::OrderStatus;

/// How long an empty filtered result is treated as "not arrived yet"
/// rather than "definitively empty".
pub const EMPTY_RESULT_GRACE: Duration = Duration::from_millis(1500);

/// Filter lifecycle published to the UI. `Filtering` doubles as the
/// empty-state suppression signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Unfiltered,
    Filtering { status: OrderStatus },
    Settled { status: OrderStatus, has_results: bool },
}

impl FilterState {
    pub fn status(&self) -> Option<OrderStatus> {
        match self {
            FilterState::Unfiltered => None,
            FilterState::Filtering { status } | FilterState::Settled { status, .. } => {
                Some(*status)
            }
        }
    }
}

pub struct StatusFilterObserver {
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
    active: Mutex<Option<CancellationToken>>,
    grace: Duration,
}

impl StatusFilterObserver {
    pub fn new(cache: Arc<dyn OrderCache>, cells: Arc<StateCells>) -> Self {
        StatusFilterObserver {
            cache,
            cells,
            active: Mutex::new(None),
            grace: EMPTY_RESULT_GRACE,
        }
    }

    /// Cancel the live subscription (if any) and hand out the token for
    /// its replacement. Cancellation is a routine outcome, never an error.
    fn supersede(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = active.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Switch the active subscription. Must be called from a tokio
    /// runtime context; the subscription runs until superseded.
    pub fn set_filter(&self, filter: Option<OrderStatus>) {
        let token = self.supersede();
        let cache = Arc::clone(&self.cache);
        let cells = Arc::clone(&self.cells);
        match filter {
            None => {
                cells.set_filter_state(FilterState::Unfiltered);
                tokio::spawn(run_unfiltered(cache, cells, token));
            }
            Some(status) => {
                cells.set_filter_state(FilterState::Filtering { status });
                cells.set_loading(true);
                debug!(status = status.as_str(), "filter subscription starting");
                tokio::spawn(run_filtered(cache, cells, status, self.grace, token));
            }
        }
    }

    /// Stop observing entirely (shutdown path).
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = active.take() {
            token.cancel();
        }
    }
}

/// Publish the full cached list on every cache change.
async fn run_unfiltered(
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
    token: CancellationToken,
) {
    let mut changes = cache.changes();
    changes.mark_changed();
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("unfiltered subscription superseded");
                return;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                match cache.cached_orders() {
                    Ok(orders) => {
                        cells.publish_orders(orders);
                        cells.set_loading(false);
                    }
                    Err(e) => warn!(error = %e, "cached order load failed"),
                }
            }
        }
    }
}

/// Publish the status-scoped list on every cache change, settling the
/// filter state once results arrive or the grace window expires.
async fn run_filtered(
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
    status: OrderStatus,
    grace: Duration,
    token: CancellationToken,
) {
    let mut changes = cache.changes();
    changes.mark_changed();
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);
    let mut settled = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(status = status.as_str(), "filter subscription superseded");
                return;
            }
            _ = &mut deadline, if !settled => {
                // Grace expired with nothing matching: the empty state
                // becomes definitive.
                settled = true;
                cells.set_loading(false);
                cells.set_filter_state(FilterState::Settled {
                    status,
                    has_results: false,
                });
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                match cache.orders_by_status(status) {
                    Ok(orders) => {
                        let has_results = !orders.is_empty();
                        cells.publish_orders(orders);
                        if has_results {
                            settled = true;
                            cells.set_loading(false);
                            cells.set_filter_state(FilterState::Settled {
                                status,
                                has_results: true,
                            });
                        } else if settled {
                            cells.set_filter_state(FilterState::Settled {
                                status,
                                has_results: false,
                            });
                        }
                        // Empty inside the grace window: stay in
                        // `Filtering`, suppressing the empty state.
                    }
                    Err(e) => {
                        warn!(error = %e, "filtered order load failed");
                        cells.set_loading(false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteOrderCache;
    use crate::model::test_fixtures::order;

    fn setup() -> (Arc<SqliteOrderCache>, Arc<StateCells>, StatusFilterObserver) {
        let cache = Arc::new(SqliteOrderCache::open_in_memory().unwrap());
        let cells = Arc::new(StateCells::new());
        let observer = StatusFilterObserver::new(cache.clone(), cells.clone());
        (cache, cells, observer)
    }

    /// Let spawned subscription tasks run; in paused mode the runtime
    /// auto-advances the clock once every task is idle.
    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_publishes_matching_orders_and_settles() {
        let (cache, cells, observer) = setup();
        cache
            .upsert_orders(
                &[order(1, "completed"), order(2, "processing"), order(3, "已完成")],
                false,
            )
            .unwrap();

        observer.set_filter(Some(OrderStatus::Completed));
        settle_tasks().await;

        let published = cells.orders_snapshot();
        assert_eq!(published.len(), 2);
        assert!(published
            .iter()
            .all(|o| o.matches_status(OrderStatus::Completed)));
        assert_eq!(
            cells.filter_snapshot(),
            FilterState::Settled {
                status: OrderStatus::Completed,
                has_results: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_filter_suppressed_until_grace_expires() {
        let (_cache, cells, observer) = setup();

        observer.set_filter(Some(OrderStatus::Refunded));
        settle_tasks().await;

        // Inside the window: still Filtering, loading still on.
        assert_eq!(
            cells.filter_snapshot(),
            FilterState::Filtering {
                status: OrderStatus::Refunded
            }
        );

        tokio::time::sleep(EMPTY_RESULT_GRACE + Duration::from_millis(100)).await;
        assert_eq!(
            cells.filter_snapshot(),
            FilterState::Settled {
                status: OrderStatus::Refunded,
                has_results: false
            }
        );
        assert!(cells.orders_snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_arriving_inside_grace_settles_with_results() {
        let (cache, cells, observer) = setup();

        observer.set_filter(Some(OrderStatus::Completed));
        settle_tasks().await;
        assert_eq!(
            cells.filter_snapshot(),
            FilterState::Filtering {
                status: OrderStatus::Completed
            }
        );

        // The scoped refresh lands in the cache before the window closes.
        cache.upsert_orders(&[order(4, "completed")], false).unwrap();
        settle_tasks().await;

        assert_eq!(
            cells.filter_snapshot(),
            FilterState::Settled {
                status: OrderStatus::Completed,
                has_results: true
            }
        );
        assert_eq!(cells.orders_snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_filters_cancels_previous_subscription() {
        let (cache, cells, observer) = setup();
        cache
            .upsert_orders(&[order(1, "completed"), order(2, "processing")], false)
            .unwrap();

        observer.set_filter(Some(OrderStatus::Completed));
        settle_tasks().await;
        observer.set_filter(Some(OrderStatus::Processing));
        settle_tasks().await;

        // Cache writes now must flow only through the processing view.
        cache.upsert_orders(&[order(3, "completed")], false).unwrap();
        settle_tasks().await;

        let published = cells.orders_snapshot();
        assert!(published
            .iter()
            .all(|o| o.matches_status(OrderStatus::Processing)));
        assert_eq!(
            cells.filter_snapshot().status(),
            Some(OrderStatus::Processing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_filter_returns_to_full_stream() {
        let (cache, cells, observer) = setup();
        cache
            .upsert_orders(&[order(1, "completed"), order(2, "processing")], false)
            .unwrap();

        observer.set_filter(Some(OrderStatus::Completed));
        settle_tasks().await;
        assert_eq!(cells.orders_snapshot().len(), 1);

        observer.set_filter(None);
        settle_tasks().await;

        assert_eq!(cells.filter_snapshot(), FilterState::Unfiltered);
        assert_eq!(cells.orders_snapshot().len(), 2);
    }
}
