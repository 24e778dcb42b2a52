//! Store connection configuration.
//!
//! An explicit value constructed by the composition root and injected
//! into each component; there is no ambient global config. Supports the
//! onboarding flow where a store owner pastes a connection string (plain
//! or base64url JSON carrying the site URL and API keys).

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::status::Locale;

/// Normalise a WooCommerce site URL:
/// - strip trailing slashes
/// - strip a trailing `/wp-json` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_site_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /wp-json
    if url.ends_with("/wp-json") {
        url.truncate(url.len() - 8);
    }

    // Strip trailing slashes again (in case "/wp-json/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

fn extract_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Connection settings for one WooCommerce store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub site_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub locale: Locale,
}

impl StoreConfig {
    pub fn new(site_url: &str, consumer_key: &str, consumer_secret: &str) -> Self {
        StoreConfig {
            site_url: normalize_site_url(site_url),
            consumer_key: consumer_key.trim().to_string(),
            consumer_secret: consumer_secret.trim().to_string(),
            locale: Locale::default(),
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Parse a pasted connection string: plain JSON or base64url JSON
    /// with `url`/`siteUrl`, `ck`/`consumerKey`, `cs`/`consumerSecret`.
    pub fn from_connection_string(raw: &str) -> Option<Self> {
        let payload = decode_connection_string_payload(raw)?;
        let site_url = extract_field(&payload, &["url", "siteUrl", "site_url"])?;
        let consumer_key = extract_field(&payload, &["ck", "consumerKey", "consumer_key"])?;
        let consumer_secret = extract_field(&payload, &["cs", "consumerSecret", "consumer_secret"])?;
        Some(StoreConfig::new(&site_url, &consumer_key, &consumer_secret))
    }

    /// All three connection fields present. A complete config may still
    /// fail the live connectivity test.
    pub fn is_complete(&self) -> bool {
        !self.site_url.is_empty()
            && !self.consumer_key.is_empty()
            && !self.consumer_secret.is_empty()
    }

    /// Base URL of the orders collection.
    pub fn orders_endpoint(&self) -> String {
        format!("{}/wp-json/wc/v3/orders", self.site_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_site_url() {
        assert_eq!(
            normalize_site_url("shop.example.com"),
            "https://shop.example.com"
        );
        assert_eq!(
            normalize_site_url("https://shop.example.com/wp-json/"),
            "https://shop.example.com"
        );
        assert_eq!(
            normalize_site_url("  https://shop.example.com///"),
            "https://shop.example.com"
        );
        assert_eq!(normalize_site_url("localhost:8080"), "http://localhost:8080");
    }

    #[test]
    fn test_from_plain_json_connection_string() {
        let cfg = StoreConfig::from_connection_string(
            r#"{ "url": "shop.example.com", "ck": "ck_abc", "cs": "cs_def" }"#,
        )
        .expect("parse connection string");
        assert_eq!(cfg.site_url, "https://shop.example.com");
        assert_eq!(cfg.consumer_key, "ck_abc");
        assert_eq!(cfg.consumer_secret, "cs_def");
        assert!(cfg.is_complete());
    }

    #[test]
    fn test_from_base64_connection_string() {
        let json = r#"{"url":"shop.example.com","ck":"ck_abc","cs":"cs_def"}"#;
        let encoded = BASE64_STANDARD.encode(json).replace('+', "-").replace('/', "_");
        let stripped = encoded.trim_end_matches('=');
        let cfg = StoreConfig::from_connection_string(stripped).expect("decode base64url");
        assert_eq!(cfg.consumer_key, "ck_abc");
    }

    #[test]
    fn test_incomplete_or_garbage_connection_string() {
        assert!(StoreConfig::from_connection_string("not a config").is_none());
        assert!(StoreConfig::from_connection_string(r#"{"url":"x.com"}"#).is_none());
        assert!(!StoreConfig::new("shop.example.com", "", "").is_complete());
    }

    #[test]
    fn test_orders_endpoint() {
        let cfg = StoreConfig::new("shop.example.com", "ck", "cs");
        assert_eq!(
            cfg.orders_endpoint(),
            "https://shop.example.com/wp-json/wc/v3/orders"
        );
    }
}
