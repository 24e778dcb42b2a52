//! WooCommerce REST API client.
//!
//! Provides authenticated HTTP communication with the store, used for
//! connectivity testing, order fetches (optionally status-scoped), and
//! status updates. Components consume the `RemoteOrderSource` trait so
//! tests can substitute a programmable fake.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::model::{FulfillmentInfo, Order, OrderId};
use crate::status::OrderStatus;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Orders fetched per request. One page covers a service day for the
/// store sizes this companion targets.
const PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Typed failure crossing the remote-source boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Cannot reach store at {url}")]
    Connect { url: String },
    #[error("Connection to {url} timed out")]
    Timeout { url: String },
    #[error("Invalid store URL: {url}")]
    InvalidUrl { url: String },
    #[error("Network error communicating with {url}: {detail}")]
    Network { url: String, detail: String },
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("Invalid JSON from store: {0}")]
    Decode(String),
}

/// Convert a `reqwest::Error` into a typed, user-presentable error.
fn friendly_error(url: &str, err: &reqwest::Error) -> SourceError {
    if err.is_connect() {
        return SourceError::Connect {
            url: url.to_string(),
        };
    }
    if err.is_timeout() {
        return SourceError::Timeout {
            url: url.to_string(),
        };
    }
    if err.is_builder() {
        return SourceError::InvalidUrl {
            url: url.to_string(),
        };
    }
    SourceError::Network {
        url: url.to_string(),
        detail: err.to_string(),
    }
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API keys are invalid or expired".to_string(),
        403 => "API keys lack permission for orders".to_string(),
        404 => "Store REST endpoint not found (is WooCommerce active?)".to_string(),
        s if s >= 500 => format!("Store server error (HTTP {s})"),
        s => format!("Unexpected response from store (HTTP {s})"),
    }
}

fn api_error(status: StatusCode, body_text: &str) -> SourceError {
    // WooCommerce error bodies carry {"code": ..., "message": ...}.
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| status_message(status));
    SourceError::Api {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Remote source seam
// ---------------------------------------------------------------------------

/// The remote order source the reconciler consumes.
#[async_trait]
pub trait RemoteOrderSource: Send + Sync {
    /// Fetch the current order page, optionally scoped to one status.
    async fn fetch_orders(&self, filter: Option<OrderStatus>) -> Result<Vec<Order>, SourceError>;

    /// Fetch orders created after `since`, newest first.
    async fn fetch_orders_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>, SourceError>;

    /// Update one order's status; returns the server's view of the order.
    async fn update_order_status(&self, id: OrderId, status: &str) -> Result<Order, SourceError>;

    /// Lightweight reachability check.
    async fn test_connection(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OrderDto {
    id: OrderId,
    number: String,
    status: String,
    date_created: String,
    total: String,
    billing: BillingDto,
    #[serde(default)]
    customer_note: Option<String>,
    #[serde(default)]
    meta_data: Vec<MetaDataDto>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingDto {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    address_1: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaDataDto {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Value,
}

/// Meta keys the common food-ordering plugins write, in lookup order.
const ORDER_METHOD_KEYS: &[&str] = &["exwfood_order_method", "_order_type", "order_type"];
const DELIVERY_TIME_KEYS: &[&str] = &[
    "exwfood_time_deli",
    "exwfood_timeslot",
    "delivery_time",
    "_delivery_time",
];
const DELIVERY_ADDRESS_KEYS: &[&str] =
    &["exwfood_delivery_address", "delivery_address", "_delivery_address"];
const DELIVERY_FEE_KEYS: &[&str] = &["exwfood_delivery_fee", "delivery_fee", "_delivery_fee"];

fn meta_lookup(meta: &[MetaDataDto], keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        meta.iter()
            .find(|m| m.key == *key)
            .and_then(|m| m.value.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn extract_fulfillment(meta: &[MetaDataDto]) -> Option<FulfillmentInfo> {
    let method = meta_lookup(meta, ORDER_METHOD_KEYS)?.to_lowercase();
    let is_delivery = method == "delivery";
    Some(FulfillmentInfo {
        time: meta_lookup(meta, DELIVERY_TIME_KEYS),
        address: is_delivery
            .then(|| meta_lookup(meta, DELIVERY_ADDRESS_KEYS))
            .flatten(),
        fee: is_delivery
            .then(|| meta_lookup(meta, DELIVERY_FEE_KEYS))
            .flatten(),
        method,
    })
}

fn parse_created(raw: &str) -> DateTime<Utc> {
    // WooCommerce emits naive store-local timestamps ("2026-08-01T12:00:00").
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| {
            warn!(raw, "unparseable order creation date, substituting now");
            Utc::now()
        })
}

impl OrderDto {
    fn into_order(self) -> Order {
        let name = [&self.billing.first_name, &self.billing.last_name]
            .iter()
            .filter_map(|part| part.as_deref())
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let customer_name = if name.is_empty() {
            "Guest".to_string()
        } else {
            name
        };

        let contact_info = self
            .billing
            .phone
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.billing.email.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string();

        let fulfillment = extract_fulfillment(&self.meta_data).map(|mut info| {
            // Some plugins skip the address meta entry; the billing
            // address is the delivery address for those stores.
            if info.is_delivery() && info.address.is_none() {
                let billing_addr = [&self.billing.address_1, &self.billing.city]
                    .iter()
                    .filter_map(|part| part.as_deref())
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                if !billing_addr.is_empty() {
                    info.address = Some(billing_addr);
                }
            }
            info
        });

        Order {
            id: self.id,
            number: self.number,
            status: self.status,
            total: self.total,
            customer_name,
            contact_info,
            customer_note: self.customer_note.unwrap_or_default(),
            date_created: parse_created(&self.date_created),
            is_printed: false,
            fulfillment,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// WooCommerce REST v3 client over consumer-key basic auth.
pub struct WooClient {
    config: StoreConfig,
    client: Client,
}

impl WooClient {
    pub fn new(config: StoreConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network {
                url: config.site_url.clone(),
                detail: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(WooClient { config, client })
    }

    async fn get_orders(&self, query: &[(&str, String)]) -> Result<Vec<Order>, SourceError> {
        let url = self.config.orders_endpoint();
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .query(query)
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.site_url, &e))?;

        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body_text));
        }

        let dtos: Vec<OrderDto> =
            serde_json::from_str(&body_text).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(dtos.into_iter().map(OrderDto::into_order).collect())
    }
}

#[async_trait]
impl RemoteOrderSource for WooClient {
    async fn fetch_orders(&self, filter: Option<OrderStatus>) -> Result<Vec<Order>, SourceError> {
        let mut query = vec![
            ("per_page", PAGE_SIZE.to_string()),
            ("orderby", "date".to_string()),
            ("order", "desc".to_string()),
        ];
        if let Some(status) = filter {
            query.push(("status", status.as_str().to_string()));
        }
        let orders = self.get_orders(&query).await?;
        info!(
            count = orders.len(),
            filter = filter.map(|s| s.as_str()),
            "fetched orders"
        );
        Ok(orders)
    }

    async fn fetch_orders_since(&self, since: DateTime<Utc>) -> Result<Vec<Order>, SourceError> {
        let query = vec![
            ("per_page", PAGE_SIZE.to_string()),
            ("orderby", "date".to_string()),
            ("order", "desc".to_string()),
            ("after", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        self.get_orders(&query).await
    }

    async fn update_order_status(&self, id: OrderId, status: &str) -> Result<Order, SourceError> {
        let url = format!("{}/{id}", self.config.orders_endpoint());
        let resp = self
            .client
            .put(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| friendly_error(&self.config.site_url, &e))?;

        let http_status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !http_status.is_success() {
            return Err(api_error(http_status, &body_text));
        }

        let dto: OrderDto =
            serde_json::from_str(&body_text).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(dto.into_order())
    }

    async fn test_connection(&self) -> bool {
        if !self.config.is_complete() {
            return false;
        }
        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(_) => return false,
        };
        let start = Instant::now();
        let resp = client
            .get(self.config.orders_endpoint())
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .query(&[("per_page", "1")])
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => {
                info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    "connectivity test passed"
                );
                true
            }
            Ok(r) => {
                warn!(status = r.status().as_u16(), "connectivity test rejected");
                false
            }
            Err(e) => {
                warn!(error = %friendly_error(&self.config.site_url, &e), "connectivity test failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dto_json() -> &'static str {
        r#"{
            "id": 1023,
            "number": "1023",
            "status": "processing",
            "date_created": "2026-08-01T12:30:00",
            "total": "42.75",
            "billing": {
                "first_name": "Mei",
                "last_name": "Lin",
                "email": "mei@example.com",
                "phone": "604-555-0101",
                "address_1": "812 Main St",
                "city": "Vancouver"
            },
            "customer_note": "extra napkins",
            "meta_data": [
                { "key": "exwfood_order_method", "value": "delivery" },
                { "key": "exwfood_time_deli", "value": "18:30" },
                { "key": "exwfood_delivery_fee", "value": "5.00" }
            ]
        }"#
    }

    #[test]
    fn test_dto_converts_to_domain_order() {
        let dto: OrderDto = serde_json::from_str(sample_dto_json()).unwrap();
        let order = dto.into_order();
        assert_eq!(order.id, 1023);
        assert_eq!(order.customer_name, "Mei Lin");
        assert_eq!(order.contact_info, "604-555-0101");
        assert_eq!(order.customer_note, "extra napkins");
        assert!(!order.is_printed);

        let fulfillment = order.fulfillment.expect("fulfillment info");
        assert!(fulfillment.is_delivery());
        assert_eq!(fulfillment.time.as_deref(), Some("18:30"));
        assert_eq!(fulfillment.fee.as_deref(), Some("5.00"));
        // No plugin address meta: falls back to the billing address.
        assert_eq!(
            fulfillment.address.as_deref(),
            Some("812 Main St, Vancouver")
        );
    }

    #[test]
    fn test_anonymous_billing_falls_back_to_guest() {
        let dto: OrderDto = serde_json::from_str(
            r#"{
                "id": 7, "number": "7", "status": "pending",
                "date_created": "2026-08-01T09:00:00", "total": "10.00",
                "billing": {}
            }"#,
        )
        .unwrap();
        let order = dto.into_order();
        assert_eq!(order.customer_name, "Guest");
        assert_eq!(order.contact_info, "");
        assert!(order.fulfillment.is_none());
    }

    #[test]
    fn test_pickup_orders_carry_no_delivery_fields() {
        let dto: OrderDto = serde_json::from_str(
            r#"{
                "id": 8, "number": "8", "status": "processing",
                "date_created": "2026-08-01T09:00:00", "total": "10.00",
                "billing": { "first_name": "Jo" },
                "meta_data": [
                    { "key": "exwfood_order_method", "value": "pickup" },
                    { "key": "exwfood_delivery_fee", "value": "5.00" }
                ]
            }"#,
        )
        .unwrap();
        let fulfillment = dto.into_order().fulfillment.expect("fulfillment info");
        assert_eq!(fulfillment.method, "pickup");
        assert!(fulfillment.fee.is_none());
        assert!(fulfillment.address.is_none());
    }

    #[test]
    fn test_parse_created_accepts_naive_and_rfc3339() {
        assert_eq!(
            parse_created("2026-08-01T12:30:00").to_rfc3339(),
            "2026-08-01T12:30:00+00:00"
        );
        assert_eq!(
            parse_created("2026-08-01T12:30:00Z").to_rfc3339(),
            "2026-08-01T12:30:00+00:00"
        );
    }

    #[test]
    fn test_api_error_prefers_store_message() {
        let err = api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"woocommerce_rest_cannot_view","message":"Sorry, you cannot list resources."}"#,
        );
        assert_eq!(
            err.to_string(),
            "Sorry, you cannot list resources. (HTTP 401)"
        );

        let fallback = api_error(StatusCode::UNAUTHORIZED, "not json");
        assert_eq!(
            fallback.to_string(),
            "API keys are invalid or expired (HTTP 401)"
        );
    }

    #[test]
    fn test_status_message_by_class() {
        assert!(status_message(StatusCode::NOT_FOUND).contains("WooCommerce"));
        assert!(status_message(StatusCode::BAD_GATEWAY).contains("HTTP 502"));
    }
}
