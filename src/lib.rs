//! woopos-core: order-state reconciliation for the WooPOS companion.
//!
//! Keeps an in-memory order list, a status filter, an unread-count
//! badge, and receipt print flags consistent with a WooCommerce store
//! and a local SQLite cache, across concurrent refreshes, optimistic
//! status edits, and background polling. The UI layer subscribes to the
//! published state cells and calls [`OrderReconciler`] operations; it
//! never mutates state directly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use woopos_core::{
//!     OrderReconciler, SqliteOrderCache, StoreConfig, WooClient,
//! };
//! # struct NullPrinter;
//! # impl woopos_core::OrderPrinter for NullPrinter {
//! #     fn print_order(
//! #         &self,
//! #         _: &woopos_core::Order,
//! #         _: &woopos_core::PrinterConfig,
//! #         _: woopos_core::TemplateType,
//! #     ) -> bool { true }
//! # }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::new("shop.example.com", "ck_...", "cs_...");
//! let source = Arc::new(WooClient::new(config.clone())?);
//! let cache = Arc::new(SqliteOrderCache::open(std::path::Path::new("data"))?);
//! let reconciler = OrderReconciler::start(config, source, cache, Arc::new(NullPrinter));
//!
//! let mut orders = reconciler.orders();
//! reconciler.refresh().await;
//! orders.changed().await?;
//! println!("{} orders", orders.borrow().len());
//! # Ok(())
//! # }
//! ```

mod api;
mod cache;
mod config;
mod events;
mod filter;
mod model;
mod mutation;
mod poller;
mod printer;
mod reconciler;
mod refresh;
mod state;
mod status;
#[cfg(test)]
pub(crate) mod testutil;
mod unread;

pub use api::{RemoteOrderSource, SourceError, WooClient};
pub use cache::{CacheError, OrderCache, SqliteOrderCache};
pub use config::{normalize_site_url, StoreConfig};
pub use events::{EventBus, Notification, PollEvent};
pub use filter::FilterState;
pub use model::{FulfillmentInfo, Order, OrderId};
pub use mutation::{MutationPhase, StatusMutation};
pub use poller::{OrderPoller, DEFAULT_POLL_INTERVAL};
pub use printer::{OrderPrinter, PrinterConfig, TemplateType};
pub use reconciler::OrderReconciler;
pub use refresh::{restore_printed_flags, RefreshOutcome};
pub use status::{canonicalize, is_known_status, localize, status_options, Locale, OrderStatus};
pub use unread::UNREAD_RETENTION_DAYS;
