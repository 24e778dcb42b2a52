//! Order domain model.
//!
//! Orders are created by remote fetch only; this crate mutates `status`
//! (through the mutation engine) and `is_printed` (through print
//! bookkeeping). Read state is deliberately not a field here: it lives
//! in the cache's unread-id set, keyed by order id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status;

/// Stable numeric order identifier assigned by the remote source.
pub type OrderId = i64;

/// Delivery/pickup details attached by the API layer. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentInfo {
    /// "delivery" or "pickup".
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
}

impl FulfillmentInfo {
    pub fn is_delivery(&self) -> bool {
        self.method.eq_ignore_ascii_case("delivery")
    }
}

/// One commerce order as published to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number ("1023").
    pub number: String,
    /// Canonical lowercase status code. Custom statuses a store plugin
    /// invents pass through unmapped.
    pub status: String,
    pub total: String,
    pub customer_name: String,
    /// Phone if available, otherwise email.
    pub contact_info: String,
    #[serde(default)]
    pub customer_note: String,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub is_printed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<FulfillmentInfo>,
}

impl Order {
    /// Basic-validity check used by the unread tracker: a displayable
    /// order with a positive id and a status from the known vocabulary.
    pub fn is_displayable(&self) -> bool {
        self.id > 0
            && !self.status.is_empty()
            && status::is_known_status(&self.status)
            && (!self.customer_name.is_empty() || !self.number.is_empty())
    }

    /// Whether the order matches `filter` directly or via the vocabulary
    /// mapping.
    pub fn matches_status(&self, filter: status::OrderStatus) -> bool {
        status::canonicalize(&self.status) == filter.as_str()
    }
}
