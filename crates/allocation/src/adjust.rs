//! Manual adjustment calculations (receiving, damage write-off, corrections).
//!
//! Unlike the reservation/release path, these return result structs instead of
//! erroring, so a caller can validate a whole batch of adjustments before
//! committing any of them. Keep the two styles distinct.

use serde::{Deserialize, Serialize};

use depot_core::{MAX_ADJUSTMENT_REASON_CHARS, MAX_INVENTORY_QUANTITY};

use crate::level::InventoryLevel;

/// Outcome of applying a delta to a level's `available`.
///
/// `new_available` carries the would-be value even when invalid, so callers
/// can report what the rejected adjustment would have produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentCalculation {
    pub is_valid: bool,
    pub new_available: i64,
    pub error_message: Option<String>,
}

/// Field-level validation outcome for adjustment input.
///
/// Collects *all* violations rather than failing on the first, for batch UX.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentInputValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Compute the effect of a manual delta on a level's `available`.
///
/// Invalid when the result would be negative or would exceed
/// [`MAX_INVENTORY_QUANTITY`]. Never panics, never errors.
pub fn calculate_adjustment(level: &InventoryLevel, delta: i64) -> AdjustmentCalculation {
    // Saturating: an extreme delta lands in one of the invalid ranges below
    // instead of overflowing.
    let new_available = level.available.saturating_add(delta);

    if new_available < 0 {
        return AdjustmentCalculation {
            is_valid: false,
            new_available,
            error_message: Some(format!(
                "adjustment would drive available negative ({} {:+} = {})",
                level.available, delta, new_available
            )),
        };
    }

    if new_available > MAX_INVENTORY_QUANTITY {
        return AdjustmentCalculation {
            is_valid: false,
            new_available,
            error_message: Some(format!(
                "adjustment would exceed the maximum inventory quantity of {MAX_INVENTORY_QUANTITY}"
            )),
        };
    }

    AdjustmentCalculation {
        is_valid: true,
        new_available,
        error_message: None,
    }
}

/// Validate adjustment input fields, collecting every violation.
pub fn validate_adjustment_input(delta: i64, reason: &str) -> AdjustmentInputValidation {
    let mut errors = Vec::new();

    if delta == 0 {
        errors.push("delta cannot be zero".to_string());
    }

    if delta.unsigned_abs() > MAX_INVENTORY_QUANTITY as u64 {
        errors.push(format!(
            "delta magnitude cannot exceed {MAX_INVENTORY_QUANTITY}"
        ));
    }

    if reason.trim().is_empty() {
        errors.push("reason is required".to_string());
    } else if reason.chars().count() > MAX_ADJUSTMENT_REASON_CHARS {
        errors.push(format!(
            "reason cannot exceed {MAX_ADJUSTMENT_REASON_CHARS} characters"
        ));
    }

    AdjustmentInputValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{LevelId, SkuId, TenantId, WarehouseId};

    fn test_level(available: i64) -> InventoryLevel {
        InventoryLevel {
            id: LevelId::new(),
            tenant_id: TenantId::new(),
            sku_id: SkuId::new(),
            warehouse_id: WarehouseId::new(),
            available,
            reserved: 0,
            damaged: None,
        }
    }

    #[test]
    fn positive_delta_within_bounds_is_valid() {
        let calc = calculate_adjustment(&test_level(5), 10);
        assert!(calc.is_valid);
        assert_eq!(calc.new_available, 15);
        assert!(calc.error_message.is_none());
    }

    #[test]
    fn negative_result_is_invalid_and_reports_would_be_value() {
        let calc = calculate_adjustment(&test_level(5), -10);
        assert!(!calc.is_valid);
        assert_eq!(calc.new_available, -5);
        assert!(calc.error_message.is_some());
    }

    #[test]
    fn result_past_the_ceiling_is_invalid() {
        let calc = calculate_adjustment(&test_level(MAX_INVENTORY_QUANTITY), 1);
        assert!(!calc.is_valid);
        assert!(calc
            .error_message
            .unwrap()
            .contains(&MAX_INVENTORY_QUANTITY.to_string()));
    }

    #[test]
    fn draining_to_exactly_zero_is_valid() {
        let calc = calculate_adjustment(&test_level(5), -5);
        assert!(calc.is_valid);
        assert_eq!(calc.new_available, 0);
    }

    #[test]
    fn input_validation_collects_all_violations() {
        let validation = validate_adjustment_input(0, "   ");
        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 2);
        assert!(validation.errors[0].contains("zero"));
        assert!(validation.errors[1].contains("reason"));
    }

    #[test]
    fn oversized_delta_magnitude_is_rejected() {
        for delta in [MAX_INVENTORY_QUANTITY + 1, -(MAX_INVENTORY_QUANTITY + 1)] {
            let validation = validate_adjustment_input(delta, "cycle count");
            assert!(!validation.is_valid);
            assert_eq!(validation.errors.len(), 1);
        }
    }

    #[test]
    fn overlong_reason_is_rejected() {
        let reason = "x".repeat(MAX_ADJUSTMENT_REASON_CHARS + 1);
        let validation = validate_adjustment_input(3, &reason);
        assert!(!validation.is_valid);
        assert!(validation.errors[0].contains("500"));
    }

    #[test]
    fn well_formed_input_passes() {
        let validation = validate_adjustment_input(-4, "damaged in transit");
        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
    }
}
