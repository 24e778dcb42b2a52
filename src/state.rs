//! Published UI state.
//!
//! Each cell is a `watch` channel: one writer component, any number of
//! UI readers. The order list is written by the refresh coordinator and
//! the mutation engine, the unread cells by the unread tracker, the
//! filter cell by the filter observer. Readers never mutate cells
//! directly; they call the reconciler's operations.

use tokio::sync::watch;

use crate::filter::FilterState;
use crate::model::{Order, OrderId};

pub struct StateCells {
    orders: watch::Sender<Vec<Order>>,
    selected: watch::Sender<Option<Order>>,
    unread: watch::Sender<Vec<Order>>,
    unread_count: watch::Sender<usize>,
    error: watch::Sender<Option<String>>,
    loading: watch::Sender<bool>,
    refreshing: watch::Sender<bool>,
    filter: watch::Sender<FilterState>,
}

impl StateCells {
    pub fn new() -> Self {
        StateCells {
            orders: watch::channel(Vec::new()).0,
            selected: watch::channel(None).0,
            unread: watch::channel(Vec::new()).0,
            unread_count: watch::channel(0).0,
            error: watch::channel(None).0,
            loading: watch::channel(true).0,
            refreshing: watch::channel(false).0,
            filter: watch::channel(FilterState::Unfiltered).0,
        }
    }

    // -- order list ---------------------------------------------------------

    pub fn publish_orders(&self, orders: Vec<Order>) {
        self.orders.send_replace(orders);
    }

    pub fn orders_snapshot(&self) -> Vec<Order> {
        self.orders.borrow().clone()
    }

    /// Rewrite the list entry with `id` in place. Returns the entry's
    /// previous value when found.
    pub fn rewrite_order<F>(&self, id: OrderId, mut rewrite: F) -> Option<Order>
    where
        F: FnMut(&mut Order),
    {
        let mut previous = None;
        self.orders.send_modify(|orders| {
            if let Some(entry) = orders.iter_mut().find(|o| o.id == id) {
                previous = Some(entry.clone());
                rewrite(entry);
            }
        });
        previous
    }

    pub fn subscribe_orders(&self) -> watch::Receiver<Vec<Order>> {
        self.orders.subscribe()
    }

    // -- selected order -----------------------------------------------------

    pub fn set_selected(&self, order: Option<Order>) {
        self.selected.send_replace(order);
    }

    pub fn selected_snapshot(&self) -> Option<Order> {
        self.selected.borrow().clone()
    }

    /// Rewrite the selected order only when it matches `id`.
    pub fn rewrite_selected<F>(&self, id: OrderId, mut rewrite: F)
    where
        F: FnMut(&mut Order),
    {
        self.selected.send_modify(|selected| {
            if let Some(order) = selected.as_mut() {
                if order.id == id {
                    rewrite(order);
                }
            }
        });
    }

    pub fn subscribe_selected(&self) -> watch::Receiver<Option<Order>> {
        self.selected.subscribe()
    }

    // -- unread -------------------------------------------------------------

    pub fn publish_unread(&self, unread: Vec<Order>) {
        self.unread_count.send_replace(unread.len());
        self.unread.send_replace(unread);
    }

    pub fn unread_snapshot(&self) -> Vec<Order> {
        self.unread.borrow().clone()
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<Vec<Order>> {
        self.unread.subscribe()
    }

    pub fn subscribe_unread_count(&self) -> watch::Receiver<usize> {
        self.unread_count.subscribe()
    }

    // -- flags and error slot -----------------------------------------------

    pub fn set_error(&self, message: impl Into<String>) {
        self.error.send_replace(Some(message.into()));
    }

    pub fn clear_error(&self) {
        self.error.send_replace(None);
    }

    pub fn error_snapshot(&self) -> Option<String> {
        self.error.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.error.subscribe()
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.send_replace(loading);
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn set_refreshing(&self, refreshing: bool) {
        self.refreshing.send_replace(refreshing);
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    // -- filter -------------------------------------------------------------

    pub fn set_filter_state(&self, state: FilterState) {
        self.filter.send_replace(state);
    }

    pub fn filter_snapshot(&self) -> FilterState {
        *self.filter.borrow()
    }

    pub fn subscribe_filter(&self) -> watch::Receiver<FilterState> {
        self.filter.subscribe()
    }
}

impl Default for StateCells {
    fn default() -> Self {
        Self::new()
    }
}
