//! Unread order tracking.
//!
//! The unread set is always recomputed from the cache's id set, never
//! patched incrementally, so repeated loads are idempotent. Ids that no
//! longer resolve to an order and orders that fail the basic-validity
//! check are purged, not retained: a wrong unread badge is worse than an
//! under-count. Cleanup failures are absorbed here; only operations the
//! user directly triggered surface errors.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::OrderCache;
use crate::model::{Order, OrderId};
use crate::state::StateCells;

/// Unread markers older than this are dropped even when otherwise valid.
pub const UNREAD_RETENTION_DAYS: i64 = 30;

pub struct UnreadTracker {
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
}

impl UnreadTracker {
    pub fn new(cache: Arc<dyn OrderCache>, cells: Arc<StateCells>) -> Self {
        UnreadTracker { cache, cells }
    }

    /// Resolve the unread id set against the cache and publish the
    /// surviving orders. Unresolvable ids and invalid orders are marked
    /// read as a side effect.
    pub fn load_unread(&self) -> usize {
        let ids = match self.cache.unread_order_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "unread id load failed");
                return self.cells.unread_snapshot().len();
            }
        };
        if ids.is_empty() {
            self.cells.publish_unread(Vec::new());
            return 0;
        }

        let resolved = match self.cache.orders_by_ids(&ids) {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "unread order resolution failed");
                return self.cells.unread_snapshot().len();
            }
        };

        // Stage 1: purge ids with no resolvable order.
        let missing: Vec<OrderId> = ids
            .iter()
            .copied()
            .filter(|id| !resolved.iter().any(|o| o.id == *id))
            .collect();
        if !missing.is_empty() {
            debug!(count = missing.len(), "purging unread markers without orders");
            if let Err(e) = self.cache.mark_orders_read(&missing) {
                warn!(error = %e, "purging dangling unread markers failed");
            }
        }

        // Stage 2: drop orders that fail the basic-validity check.
        let (valid, invalid): (Vec<Order>, Vec<Order>) =
            resolved.into_iter().partition(Order::is_displayable);
        if !invalid.is_empty() {
            let invalid_ids: Vec<OrderId> = invalid.iter().map(|o| o.id).collect();
            debug!(ids = ?invalid_ids, "marking invalid unread orders read");
            if let Err(e) = self.cache.mark_orders_read(&invalid_ids) {
                warn!(error = %e, "marking invalid unread orders read failed");
            }
        }

        // Stage 3: publish the survivors.
        let count = valid.len();
        self.cells.publish_unread(valid);
        count
    }

    /// Startup validation: beyond `load_unread`'s checks, drop markers
    /// older than the retention window. Any invalid entry triggers a
    /// full reset, since partial repair would oscillate between stale and
    /// correct counts across restarts. Returns whether the set was clean.
    pub fn validate(&self) -> bool {
        let ids = match self.cache.unread_order_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "unread validation could not load ids");
                self.cells.publish_unread(Vec::new());
                return false;
            }
        };
        if ids.is_empty() {
            self.cells.publish_unread(Vec::new());
            return true;
        }

        let resolved = self.cache.orders_by_ids(&ids).unwrap_or_default();
        let cutoff = Utc::now() - ChronoDuration::days(UNREAD_RETENTION_DAYS);

        let clean = resolved.len() == ids.len()
            && resolved
                .iter()
                .all(|order| order.is_displayable() && order.date_created >= cutoff);

        if clean {
            let count = resolved.len();
            self.cells.publish_unread(resolved);
            info!(count, "unread set validated");
            return true;
        }

        info!(
            unread = ids.len(),
            resolved = resolved.len(),
            "invalid unread entries found at startup, resetting unread state"
        );
        if let Err(e) = self.cache.mark_all_read() {
            warn!(error = %e, "unread reset failed");
        }
        self.cells.publish_unread(Vec::new());
        false
    }

    /// Mark one order read: the published set updates immediately, the
    /// cache write happens off the caller's path.
    pub fn mark_read(&self, order_id: OrderId) {
        let remaining: Vec<Order> = self
            .cells
            .unread_snapshot()
            .into_iter()
            .filter(|o| o.id != order_id)
            .collect();
        self.cells.publish_unread(remaining);

        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.mark_orders_read(&[order_id]) {
                warn!(order_id, error = %e, "persisting mark-read failed");
            }
        });
    }

    /// Mark every order read, local-first like `mark_read`.
    pub fn mark_all_read(&self) {
        self.cells.publish_unread(Vec::new());

        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.mark_all_read() {
                warn!(error = %e, "persisting mark-all-read failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteOrderCache;
    use crate::model::test_fixtures::order;

    fn setup() -> (Arc<SqliteOrderCache>, Arc<StateCells>, UnreadTracker) {
        let cache = Arc::new(SqliteOrderCache::open_in_memory().unwrap());
        let cells = Arc::new(StateCells::new());
        let tracker = UnreadTracker::new(cache.clone(), cells.clone());
        (cache, cells, tracker)
    }

    #[test]
    fn test_load_unread_purges_dangling_ids() {
        let (cache, cells, tracker) = setup();
        cache.upsert_orders(&[order(5, "processing")], true).unwrap();
        // Marker for an order that no longer exists.
        cache.execute_raw("INSERT INTO unread_orders (order_id) VALUES (9)");

        let count = tracker.load_unread();

        assert_eq!(count, 1);
        assert_eq!(cells.unread_snapshot().len(), 1);
        assert_eq!(cells.unread_snapshot()[0].id, 5);
        // The dangling marker was purged from the cache, not retained.
        assert_eq!(cache.unread_order_ids().unwrap(), vec![5]);
    }

    #[test]
    fn test_load_unread_drops_invalid_orders() {
        let (cache, cells, tracker) = setup();
        cache.upsert_orders(&[order(1, "processing")], true).unwrap();
        // An order with an out-of-vocabulary status stays cached but
        // cannot hold an unread badge.
        cache.upsert_orders(&[order(2, "mystery-status")], true).unwrap();

        let count = tracker.load_unread();

        assert_eq!(count, 1);
        assert_eq!(cells.unread_snapshot()[0].id, 1);
        assert_eq!(cache.unread_order_ids().unwrap(), vec![1]);
    }

    #[test]
    fn test_load_unread_is_idempotent() {
        let (cache, cells, tracker) = setup();
        cache
            .upsert_orders(&[order(1, "processing"), order(2, "pending")], true)
            .unwrap();

        assert_eq!(tracker.load_unread(), 2);
        assert_eq!(tracker.load_unread(), 2);
        assert_eq!(cells.unread_snapshot().len(), 2);
    }

    #[test]
    fn test_validate_accepts_clean_recent_set() {
        let (cache, cells, tracker) = setup();
        let mut recent = order(1, "processing");
        recent.date_created = Utc::now() - ChronoDuration::days(2);
        cache.upsert_orders(&[recent], true).unwrap();

        assert!(tracker.validate());
        assert_eq!(cells.unread_snapshot().len(), 1);
    }

    #[test]
    fn test_validate_resets_everything_on_stale_entry() {
        let (cache, cells, tracker) = setup();
        let mut recent = order(1, "processing");
        recent.date_created = Utc::now() - ChronoDuration::days(2);
        let mut stale = order(2, "processing");
        stale.date_created = Utc::now() - ChronoDuration::days(45);
        cache.upsert_orders(&[recent, stale], true).unwrap();

        // One stale entry resets the whole set, not just the stale id.
        assert!(!tracker.validate());
        assert!(cells.unread_snapshot().is_empty());
        assert!(cache.unread_order_ids().unwrap().is_empty());
    }

    #[test]
    fn test_validate_resets_on_dangling_marker() {
        let (cache, cells, tracker) = setup();
        cache.upsert_orders(&[order(1, "processing")], true).unwrap();
        cache.execute_raw("INSERT INTO unread_orders (order_id) VALUES (9)");

        assert!(!tracker.validate());
        assert!(cells.unread_snapshot().is_empty());
        assert!(cache.unread_order_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_updates_cells_immediately() {
        let (cache, cells, tracker) = setup();
        cache
            .upsert_orders(&[order(1, "processing"), order(2, "processing")], true)
            .unwrap();
        tracker.load_unread();
        assert_eq!(cells.unread_snapshot().len(), 2);

        tracker.mark_read(1);
        assert_eq!(cells.unread_snapshot().len(), 1);
        assert_eq!(cells.unread_snapshot()[0].id, 2);

        // The cache write lands shortly after.
        tokio::task::yield_now().await;
        assert_eq!(cache.unread_order_ids().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_mark_all_read_clears_cells_and_cache() {
        let (cache, cells, tracker) = setup();
        cache
            .upsert_orders(&[order(1, "processing"), order(2, "processing")], true)
            .unwrap();
        tracker.load_unread();

        tracker.mark_all_read();
        assert!(cells.unread_snapshot().is_empty());

        tokio::task::yield_now().await;
        assert!(cache.unread_order_ids().unwrap().is_empty());
    }
}
