//! Printer seam.
//!
//! Receipt rendering and hardware transport live outside this crate; the
//! reconciler only selects a template, asks for copies, and reacts to the
//! boolean outcome by recording print state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::Order;

/// Receipt template selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    #[default]
    FullDetails,
    Delivery,
    Kitchen,
}

/// Target printer configuration handed through to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterConfig {
    pub name: String,
    /// Paper width in mm (58 or 80 for the supported thermal printers).
    pub paper_width: u16,
    #[serde(default)]
    pub auto_cut: bool,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        PrinterConfig {
            name: "default".to_string(),
            paper_width: 80,
            auto_cut: true,
        }
    }
}

/// Per-template copy counts for a manual print run. Zero entries fall
/// back to one copy.
pub fn copies_for(copies: &HashMap<TemplateType, u32>, template: TemplateType) -> u32 {
    copies.get(&template).copied().unwrap_or(1).max(1)
}

/// The printer subsystem the reconciler consumes. Returns plain success;
/// drivers report their own diagnostics out of band.
pub trait OrderPrinter: Send + Sync {
    fn print_order(&self, order: &Order, config: &PrinterConfig, template: TemplateType) -> bool;
}
