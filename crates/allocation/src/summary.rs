//! Read-only sufficiency checks and inventory aggregation.

use serde::{Deserialize, Serialize};

use crate::level::InventoryLevel;

/// Pre-flight sufficiency check outcome (e.g. cart-level availability).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValidation {
    pub is_valid: bool,
    pub available: i64,
    pub message: Option<String>,
}

/// Aggregated view over a set of inventory levels. Pure reduction, no failure
/// modes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total_items: usize,
    /// `available + reserved` across all levels.
    pub total_quantity: i64,
    pub total_reserved: i64,
    pub total_available: i64,
    pub total_damaged: i64,
    /// Count of levels with `available == 0`.
    pub out_of_stock_count: usize,
}

/// Check whether a single level can satisfy `required_quantity`, without
/// reserving anything.
pub fn validate_stock_level(level: &InventoryLevel, required_quantity: i64) -> StockValidation {
    if level.available >= required_quantity {
        StockValidation {
            is_valid: true,
            available: level.available,
            message: None,
        }
    } else {
        StockValidation {
            is_valid: false,
            available: level.available,
            message: Some(format!(
                "insufficient stock: required {required_quantity}, available {}",
                level.available
            )),
        }
    }
}

/// Aggregate totals across a set of levels.
pub fn calculate_inventory_summary(levels: &[InventoryLevel]) -> InventorySummary {
    levels.iter().fold(InventorySummary::default(), |mut acc, level| {
        acc.total_items += 1;
        acc.total_quantity += level.on_hand();
        acc.total_reserved += level.reserved;
        acc.total_available += level.available;
        acc.total_damaged += level.damaged.unwrap_or(0);
        if level.is_out_of_stock() {
            acc.out_of_stock_count += 1;
        }
        acc
    })
}
