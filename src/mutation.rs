//! Optimistic status mutation.
//!
//! A status change is applied to the published state before the server
//! answers, then reconciled: the server's returned order is adopted as
//! authoritative on success, or the recorded prior status is restored on
//! failure. Each call yields an auditable `StatusMutation` record; races
//! between two mutations on the same order are allowed and resolve
//! last-write-wins, which is acceptable for a single-operator terminal.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::RemoteOrderSource;
use crate::cache::OrderCache;
use crate::events::{EventBus, Notification};
use crate::model::OrderId;
use crate::state::StateCells;
use crate::status;

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Applied locally, server call not yet resolved.
    Pending,
    /// Server accepted; its returned order was adopted.
    Confirmed,
    /// Server rejected; the prior status was restored.
    RolledBack,
}

/// Audit record of one status mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMutation {
    pub order_id: OrderId,
    /// Status before the optimistic apply; `None` when the order was not
    /// in the published list or cache.
    pub from: Option<String>,
    /// Canonical status written.
    pub to: String,
    pub phase: MutationPhase,
}

pub struct MutationEngine {
    source: Arc<dyn RemoteOrderSource>,
    cache: Arc<dyn OrderCache>,
    cells: Arc<StateCells>,
    bus: EventBus,
}

impl MutationEngine {
    pub fn new(
        source: Arc<dyn RemoteOrderSource>,
        cache: Arc<dyn OrderCache>,
        cells: Arc<StateCells>,
        bus: EventBus,
    ) -> Self {
        MutationEngine {
            source,
            cache,
            cells,
            bus,
        }
    }

    /// Optimistically update one order's status and reconcile with the
    /// server result.
    pub async fn update_status(&self, order_id: OrderId, new_status: &str) -> StatusMutation {
        let to = status::canonicalize(new_status).to_string();

        // Optimistic apply, recording what we overwrite.
        let previous_entry = self.cells.rewrite_order(order_id, |order| {
            order.status = to.clone();
        });
        self.cells.rewrite_selected(order_id, |order| {
            order.status = to.clone();
        });

        let from = match &previous_entry {
            Some(order) => Some(order.status.clone()),
            None => self
                .cache
                .order_by_id(order_id)
                .ok()
                .flatten()
                .map(|order| order.status),
        };

        let mut mutation = StatusMutation {
            order_id,
            from,
            to: to.clone(),
            phase: MutationPhase::Pending,
        };

        match self.source.update_order_status(order_id, &to).await {
            Ok(mut server_order) => {
                // The server may normalize further; adopt its view, but a
                // printed flag this terminal set stays set.
                let locally_printed = previous_entry
                    .as_ref()
                    .map(|o| o.is_printed)
                    .unwrap_or(false);
                server_order.is_printed = server_order.is_printed || locally_printed;

                self.cells.rewrite_order(order_id, |order| {
                    *order = server_order.clone();
                });
                self.cells.rewrite_selected(order_id, |order| {
                    *order = server_order.clone();
                });
                if let Err(e) = self.cache.upsert_orders(&[server_order.clone()], false) {
                    warn!(order_id, error = %e, "persisting confirmed status failed");
                }

                self.bus.notify(Notification::StatusChanged {
                    order_id,
                    number: server_order.number.clone(),
                    new_status: server_order.status.clone(),
                });
                info!(order_id, status = %server_order.status, "status update confirmed");
                mutation.phase = MutationPhase::Confirmed;
            }
            Err(e) => {
                // Roll back both copies to the recorded prior status.
                if let Some(prior) = mutation.from.clone() {
                    self.cells.rewrite_order(order_id, |order| {
                        order.status = prior.clone();
                    });
                    self.cells.rewrite_selected(order_id, |order| {
                        order.status = prior.clone();
                    });
                }
                warn!(order_id, error = %e, "status update failed, rolled back");
                self.cells
                    .set_error(format!("Order status update failed: {e}"));
                mutation.phase = MutationPhase::RolledBack;
            }
        }

        mutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteOrderCache;
    use crate::model::test_fixtures::order;
    use crate::testutil::FakeSource;

    fn engine(
        source: Arc<FakeSource>,
    ) -> (MutationEngine, Arc<SqliteOrderCache>, Arc<StateCells>, EventBus) {
        let cache = Arc::new(SqliteOrderCache::open_in_memory().unwrap());
        let cells = Arc::new(StateCells::new());
        let bus = EventBus::new();
        let engine = MutationEngine::new(source, cache.clone(), cells.clone(), bus.clone());
        (engine, cache, cells, bus)
    }

    #[tokio::test]
    async fn test_confirmed_mutation_adopts_server_order() {
        let source = Arc::new(FakeSource::with_orders(vec![order(42, "processing")]));
        let (engine, cache, cells, bus) = engine(source);
        cells.publish_orders(vec![order(42, "processing")]);
        cells.set_selected(Some(order(42, "processing")));
        let mut notifications = bus.subscribe_notifications();

        let mutation = engine.update_status(42, "completed").await;

        assert_eq!(mutation.phase, MutationPhase::Confirmed);
        assert_eq!(mutation.from.as_deref(), Some("processing"));
        assert_eq!(mutation.to, "completed");
        assert_eq!(cells.orders_snapshot()[0].status, "completed");
        assert_eq!(cells.selected_snapshot().unwrap().status, "completed");
        assert_eq!(cache.order_by_id(42).unwrap().unwrap().status, "completed");
        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::StatusChanged {
                order_id: 42,
                number: "42".to_string(),
                new_status: "completed".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back_list_and_selected() {
        let source = Arc::new(FakeSource::with_orders(vec![order(42, "processing")]));
        source.fail_next_update();
        let (engine, _cache, cells, _bus) = engine(source);
        cells.publish_orders(vec![order(42, "processing")]);
        cells.set_selected(Some(order(42, "processing")));

        let mutation = engine.update_status(42, "cancelled").await;

        assert_eq!(mutation.phase, MutationPhase::RolledBack);
        assert_eq!(cells.orders_snapshot()[0].status, "processing");
        assert_eq!(cells.selected_snapshot().unwrap().status, "processing");
        assert!(cells.error_snapshot().is_some());
    }

    #[tokio::test]
    async fn test_localized_target_status_is_canonicalized() {
        let source = Arc::new(FakeSource::with_orders(vec![order(7, "processing")]));
        let (engine, _cache, cells, _bus) = engine(source.clone());
        cells.publish_orders(vec![order(7, "processing")]);

        let mutation = engine.update_status(7, "已完成").await;

        assert_eq!(mutation.to, "completed");
        assert_eq!(source.last_update_status().as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn test_confirmed_mutation_keeps_local_printed_flag() {
        let source = Arc::new(FakeSource::with_orders(vec![order(9, "processing")]));
        let (engine, _cache, cells, _bus) = engine(source);
        let mut printed = order(9, "processing");
        printed.is_printed = true;
        cells.publish_orders(vec![printed]);

        engine.update_status(9, "completed").await;

        let entry = &cells.orders_snapshot()[0];
        assert_eq!(entry.status, "completed");
        assert!(entry.is_printed, "server view must not clear the printed flag");
    }

    #[tokio::test]
    async fn test_unknown_order_still_attempts_remote_and_records_phase() {
        let source = Arc::new(FakeSource::with_orders(vec![]));
        source.fail_next_update();
        let (engine, _cache, _cells, _bus) = engine(source);

        let mutation = engine.update_status(404, "completed").await;

        assert_eq!(mutation.from, None);
        assert_eq!(mutation.phase, MutationPhase::RolledBack);
    }
}
