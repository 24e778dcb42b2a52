//! Order status vocabulary.
//!
//! WooCommerce reports order state as a lowercase English code
//! ("processing", "on-hold", ...). The UI shows localized labels and may
//! hand either form back to us, so both directions go through the tables
//! here. Mapping is total: unknown input passes through unchanged so
//! callers can treat an unmapped label as a soft failure instead of an
//! error path.

use serde::{Deserialize, Serialize};

/// Canonical order states, matching the remote API vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Processing,
    OnHold,
    Completed,
    Cancelled,
    Refunded,
    Failed,
}

/// Display locale for status labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

/// (canonical code, English label, primary Chinese label)
const LABELS: [(OrderStatus, &str, &str); 7] = [
    (OrderStatus::Pending, "pending", "待付款"),
    (OrderStatus::Processing, "processing", "处理中"),
    (OrderStatus::OnHold, "on-hold", "暂挂"),
    (OrderStatus::Completed, "completed", "已完成"),
    (OrderStatus::Cancelled, "cancelled", "已取消"),
    (OrderStatus::Refunded, "refunded", "已退款"),
    (OrderStatus::Failed, "failed", "失败"),
];

/// Accepted input synonyms that are never produced as output.
/// Kept as a single table so a confirmed alias list is a one-line change.
const INPUT_ALIASES: [(&str, OrderStatus); 2] = [
    ("待处理", OrderStatus::Pending),
    ("保留", OrderStatus::OnHold),
];

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::OnHold,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::Failed,
    ];

    /// The canonical lowercase API code.
    pub fn as_str(self) -> &'static str {
        LABELS[self as usize].1
    }

    /// The display label for `locale`.
    pub fn label(self, locale: Locale) -> &'static str {
        let (_, en, zh) = LABELS[self as usize];
        match locale {
            Locale::En => en,
            Locale::Zh => zh,
        }
    }

    /// Parse a canonical code, localized label, or accepted alias.
    pub fn parse(input: &str) -> Option<OrderStatus> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        for (status, en, zh) in LABELS {
            if trimmed.eq_ignore_ascii_case(en) || trimmed == zh {
                return Some(status);
            }
        }
        INPUT_ALIASES
            .iter()
            .find(|(alias, _)| *alias == trimmed)
            .map(|(_, status)| *status)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map any status label to its canonical API code.
///
/// Idempotent on canonical input; unknown input is returned unchanged.
pub fn canonicalize(label: &str) -> &str {
    match OrderStatus::parse(label) {
        Some(status) => status.as_str(),
        None => label,
    }
}

/// Map a canonical code to its label in `locale`.
///
/// Unknown codes are returned unchanged.
pub fn localize(code: &str, locale: Locale) -> &str {
    match OrderStatus::parse(code) {
        Some(status) => status.label(locale),
        None => code,
    }
}

/// Whether `label` maps into the known vocabulary in any accepted form.
pub fn is_known_status(label: &str) -> bool {
    OrderStatus::parse(label).is_some()
}

/// Status options for a UI picker: (localized label, canonical code).
pub fn status_options(locale: Locale) -> Vec<(&'static str, &'static str)> {
    OrderStatus::ALL
        .iter()
        .map(|s| (s.label(locale), s.as_str()))
        .collect()
}
