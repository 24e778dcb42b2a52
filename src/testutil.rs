//! Shared test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{RemoteOrderSource, SourceError};
use crate::model::{Order, OrderId};
use crate::printer::{OrderPrinter, PrinterConfig, TemplateType};
use crate::status::{self, OrderStatus};

/// Programmable in-memory remote source.
pub struct FakeSource {
    orders: Mutex<Vec<Order>>,
    fetch_calls: AtomicUsize,
    since_calls: AtomicUsize,
    fail_next_fetch: AtomicBool,
    fail_next_update: AtomicBool,
    last_update_status: Mutex<Option<String>>,
}

impl FakeSource {
    pub fn with_orders(orders: Vec<Order>) -> Self {
        FakeSource {
            orders: Mutex::new(orders),
            fetch_calls: AtomicUsize::new(0),
            since_calls: AtomicUsize::new(0),
            fail_next_fetch: AtomicBool::new(false),
            fail_next_update: AtomicBool::new(false),
            last_update_status: Mutex::new(None),
        }
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        *self.orders.lock().unwrap() = orders;
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn since_calls(&self) -> usize {
        self.since_calls.load(Ordering::SeqCst)
    }

    pub fn last_update_status(&self) -> Option<String> {
        self.last_update_status.lock().unwrap().clone()
    }

    fn unavailable() -> SourceError {
        SourceError::Api {
            status: 503,
            message: "Store server error (HTTP 503)".to_string(),
        }
    }
}

#[async_trait]
impl RemoteOrderSource for FakeSource {
    async fn fetch_orders(&self, filter: Option<OrderStatus>) -> Result<Vec<Order>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let orders = self.orders.lock().unwrap().clone();
        Ok(match filter {
            Some(status) => orders
                .into_iter()
                .filter(|o| o.matches_status(status))
                .collect(),
            None => orders,
        })
    }

    async fn fetch_orders_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>, SourceError> {
        self.since_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let orders = self.orders.lock().unwrap().clone();
        Ok(orders
            .into_iter()
            .filter(|o| o.date_created > since)
            .collect())
    }

    async fn update_order_status(&self, id: OrderId, status: &str) -> Result<Order, SourceError> {
        *self.last_update_status.lock().unwrap() = Some(status.to_string());
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut orders = self.orders.lock().unwrap();
        match orders.iter_mut().find(|o| o.id == id) {
            Some(order) => {
                order.status = status::canonicalize(status).to_string();
                Ok(order.clone())
            }
            None => Err(SourceError::Api {
                status: 404,
                message: format!("No order with id {id}"),
            }),
        }
    }

    async fn test_connection(&self) -> bool {
        !self.fail_next_fetch.load(Ordering::SeqCst)
    }
}

/// Printer double that records calls and can be told to fail.
pub struct FakePrinter {
    pub succeed: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakePrinter {
    pub fn new() -> Self {
        FakePrinter {
            succeed: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }
}

impl OrderPrinter for FakePrinter {
    fn print_order(&self, _order: &Order, _config: &PrinterConfig, _template: TemplateType) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.succeed.load(Ordering::SeqCst)
    }
}
