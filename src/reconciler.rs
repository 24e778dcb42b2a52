//! Composition root.
//!
//! Wires the refresh coordinator, filter observer, mutation engine,
//! unread tracker, and printer bookkeeping over one set of state cells,
//! and exposes the operation surface the UI calls. Cell ownership is
//! strict: the coordinator and mutation engine write the order list, the
//! unread tracker writes the unread cells, the filter observer writes
//! the filter cell. The UI only subscribes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::RemoteOrderSource;
use crate::cache::OrderCache;
use crate::config::StoreConfig;
use crate::events::{EventBus, Notification};
use crate::filter::{FilterState, StatusFilterObserver};
use crate::model::{Order, OrderId};
use crate::mutation::{MutationEngine, MutationPhase, StatusMutation};
use crate::printer::{copies_for, OrderPrinter, PrinterConfig, TemplateType};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::state::StateCells;
use crate::status::OrderStatus;
use crate::unread::UnreadTracker;

/// How long to let a completed refresh settle in the cache before the
/// unread reconciliation pass reads it back.
const UNREAD_RECONCILE_DELAY: Duration = Duration::from_millis(300);

/// Spacing between copies in a multi-copy print run, so the spooler is
/// not flooded.
const PRINT_THROTTLE: Duration = Duration::from_millis(200);

pub struct OrderReconciler {
    config: StoreConfig,
    source: Arc<dyn RemoteOrderSource>,
    cache: Arc<dyn OrderCache>,
    printer: Arc<dyn OrderPrinter>,
    cells: Arc<StateCells>,
    bus: EventBus,
    coordinator: Arc<RefreshCoordinator>,
    mutations: MutationEngine,
    unread: Arc<UnreadTracker>,
    filter: StatusFilterObserver,
    shutdown: CancellationToken,
}

impl OrderReconciler {
    /// Wire the reconciler and start its background work: the unfiltered
    /// order subscription, the startup unread validation, and the poll
    /// event listener. Must be called inside a tokio runtime.
    pub fn start(
        config: StoreConfig,
        source: Arc<dyn RemoteOrderSource>,
        cache: Arc<dyn OrderCache>,
        printer: Arc<dyn OrderPrinter>,
    ) -> Arc<Self> {
        let cells = Arc::new(StateCells::new());
        let bus = EventBus::new();

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&source),
            Arc::clone(&cache),
            Arc::clone(&cells),
        ));
        let mutations = MutationEngine::new(
            Arc::clone(&source),
            Arc::clone(&cache),
            Arc::clone(&cells),
            bus.clone(),
        );
        let unread = Arc::new(UnreadTracker::new(Arc::clone(&cache), Arc::clone(&cells)));
        let filter = StatusFilterObserver::new(Arc::clone(&cache), Arc::clone(&cells));

        let reconciler = Arc::new(OrderReconciler {
            config,
            source,
            cache,
            printer,
            cells,
            bus,
            coordinator,
            mutations,
            unread,
            filter,
            shutdown: CancellationToken::new(),
        });

        // Cached orders first; the first refresh replaces them.
        reconciler.filter.set_filter(None);

        // Startup pass: validate the unread set once, then load it.
        let startup = Arc::clone(&reconciler.unread);
        tokio::spawn(async move {
            if !startup.validate() {
                debug!("unread state was reset at startup");
            }
            startup.load_unread();
        });

        reconciler.spawn_poll_listener();

        reconciler
    }

    /// React to poll events for as long as the reconciler lives. The
    /// refresh debounce collapses event bursts into one fetch.
    fn spawn_poll_listener(self: &Arc<Self>) {
        let reconciler = Arc::clone(self);
        let mut events = self.bus.subscribe_poll();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            debug!(?event, "poll event received, refreshing under current filter");
                            reconciler.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "poll listener lagged, refreshing once");
                            reconciler.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Stop background tasks. Published state stays readable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.filter.stop();
    }

    // -- configuration ------------------------------------------------------

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether the store connection is usable: complete credentials and
    /// a passing connectivity test.
    pub async fn check_configuration(&self) -> bool {
        if !self.config.is_complete() {
            return false;
        }
        self.source.test_connection().await
    }

    // -- refresh ------------------------------------------------------------

    /// Refresh under the current filter. A completed refresh schedules
    /// the unread reconciliation pass after a short settle delay.
    pub async fn refresh(&self) -> RefreshOutcome {
        let filter = self.cells.filter_snapshot().status();
        let outcome = self.coordinator.refresh(filter).await;
        if let RefreshOutcome::Completed { .. } = outcome {
            let unread = Arc::clone(&self.unread);
            tokio::spawn(async move {
                tokio::time::sleep(UNREAD_RECONCILE_DELAY).await;
                unread.load_unread();
            });
        }
        outcome
    }

    // -- filtering ----------------------------------------------------------

    /// Switch the status filter. Selecting a status also triggers a
    /// scoped refresh so the subscription has fresh rows to observe.
    pub async fn filter_by_status(&self, filter: Option<OrderStatus>) {
        self.filter.set_filter(filter);
        if filter.is_some() {
            self.refresh().await;
        }
    }

    /// Label-based entry point for UI pickers: accepts canonical codes,
    /// localized labels, and aliases. An unmappable label leaves the
    /// filter untouched.
    pub async fn filter_orders(&self, label: Option<&str>) -> bool {
        match label.map(str::trim).filter(|l| !l.is_empty()) {
            None => {
                self.filter_by_status(None).await;
                true
            }
            Some(raw) => match OrderStatus::parse(raw) {
                Some(status) => {
                    self.filter_by_status(Some(status)).await;
                    true
                }
                None => {
                    warn!(label = raw, "unknown status label, filter unchanged");
                    false
                }
            },
        }
    }

    // -- selection ----------------------------------------------------------

    pub fn open_order_details(&self, order_id: OrderId) {
        match self.cache.order_by_id(order_id) {
            Ok(Some(order)) => self.cells.set_selected(Some(order)),
            Ok(None) => {
                warn!(order_id, "order details requested for unknown order");
                self.cells
                    .set_error(format!("Order {order_id} is not available"));
            }
            Err(e) => {
                warn!(order_id, error = %e, "order details load failed");
                self.cells
                    .set_error(format!("Could not load order details: {e}"));
            }
        }
    }

    pub fn clear_selected_order(&self) {
        self.cells.set_selected(None);
    }

    pub fn clear_error(&self) {
        self.cells.clear_error();
    }

    // -- status mutation ----------------------------------------------------

    /// Optimistically update an order's status. A confirmed mutation is
    /// followed by a full refresh to resynchronize everything else.
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        new_status: &str,
    ) -> StatusMutation {
        let mutation = self.mutations.update_status(order_id, new_status).await;
        if mutation.phase == MutationPhase::Confirmed {
            self.refresh().await;
        }
        mutation
    }

    // -- unread -------------------------------------------------------------

    pub fn load_unread_orders(&self) -> usize {
        self.unread.load_unread()
    }

    pub fn mark_order_read(&self, order_id: OrderId) {
        self.unread.mark_read(order_id);
    }

    pub fn mark_all_orders_read(&self) {
        self.unread.mark_all_read();
    }

    // -- printing -----------------------------------------------------------

    /// Print one order and record the outcome. Deliberately no refresh
    /// afterwards: a fetch racing the print would overwrite the locally
    /// recorded flag, which is exactly what the print-state guard exists
    /// to prevent.
    pub async fn print_order(
        &self,
        order_id: OrderId,
        printer_config: &PrinterConfig,
        template: TemplateType,
    ) -> bool {
        let order = match self.cache.order_by_id(order_id) {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(order_id, "print requested for unknown order");
                self.cells
                    .set_error(format!("Order {order_id} is not available"));
                return false;
            }
            Err(e) => {
                warn!(order_id, error = %e, "print lookup failed");
                self.cells.set_error(format!("Could not print order: {e}"));
                return false;
            }
        };

        if self.printer.print_order(&order, printer_config, template) {
            self.mark_order_printed(order_id);
            true
        } else {
            warn!(order_id, "printing failed");
            self.cells
                .set_error(format!("Printing order {} failed", order.number));
            false
        }
    }

    /// Manual multi-template print run; the order is marked printed when
    /// at least one copy succeeded.
    pub async fn print_order_with_copies(
        &self,
        order_id: OrderId,
        printer_config: &PrinterConfig,
        copies: &HashMap<TemplateType, u32>,
    ) -> bool {
        let order = match self.cache.order_by_id(order_id) {
            Ok(Some(order)) => order,
            _ => {
                self.cells
                    .set_error(format!("Order {order_id} is not available"));
                return false;
            }
        };

        let mut any_success = false;
        for (&template, _) in copies {
            for _ in 0..copies_for(copies, template) {
                if self.printer.print_order(&order, printer_config, template) {
                    any_success = true;
                }
                tokio::time::sleep(PRINT_THROTTLE).await;
            }
        }

        if any_success {
            self.mark_order_printed(order_id);
        } else {
            self.cells
                .set_error(format!("Printing order {} failed", order.number));
        }
        any_success
    }

    /// Record the printed flag locally: cache row, list entry, and the
    /// selected-order copy, in that order.
    pub fn mark_order_printed(&self, order_id: OrderId) {
        match self.cache.mark_order_printed(order_id) {
            Ok(true) => {}
            Ok(false) => warn!(order_id, "printed flag for order not in cache"),
            Err(e) => warn!(order_id, error = %e, "persisting printed flag failed"),
        }
        self.cells.rewrite_order(order_id, |order| {
            order.is_printed = true;
        });
        self.cells.rewrite_selected(order_id, |order| {
            order.is_printed = true;
        });
        self.bus.notify(Notification::OrderPrinted { order_id });
        info!(order_id, "order marked printed");
    }

    // -- published state ----------------------------------------------------

    pub fn orders(&self) -> watch::Receiver<Vec<Order>> {
        self.cells.subscribe_orders()
    }

    pub fn selected_order(&self) -> watch::Receiver<Option<Order>> {
        self.cells.subscribe_selected()
    }

    pub fn unread_orders(&self) -> watch::Receiver<Vec<Order>> {
        self.cells.subscribe_unread()
    }

    pub fn unread_count(&self) -> watch::Receiver<usize> {
        self.cells.subscribe_unread_count()
    }

    pub fn error_message(&self) -> watch::Receiver<Option<String>> {
        self.cells.subscribe_error()
    }

    pub fn loading(&self) -> watch::Receiver<bool> {
        self.cells.subscribe_loading()
    }

    pub fn refreshing(&self) -> watch::Receiver<bool> {
        self.cells.subscribe_refreshing()
    }

    pub fn filter_state(&self) -> watch::Receiver<FilterState> {
        self.cells.subscribe_filter()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe_notifications()
    }

    /// The bus boundary adapters (pollers, push receivers) publish into.
    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }
}

impl Drop for OrderReconciler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
