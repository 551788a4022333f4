//! Reservation, release, and shipment calculations.
//!
//! Pure functions: given current state they return a calculated delta or a
//! typed failure. Nothing here mutates or persists; the orchestrator in
//! `depot-store` applies the results inside a transaction.

use std::future::Future;

use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, LevelId, SkuId, WarehouseId, MAX_INVENTORY_QUANTITY};

use crate::level::InventoryLevel;
use crate::order::OrderItem;
use crate::reservation::Reservation;

/// Outcome of a single-item reservation calculation (not yet persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCalculation {
    /// The matched level (first-fit winner).
    pub level_id: LevelId,
    pub warehouse_id: WarehouseId,
    pub sku_id: SkuId,
    /// Quantity to move from `available` to `reserved`.
    pub quantity: i64,
    pub new_available: i64,
    pub new_reserved: i64,
}

/// Outcome of releasing a reservation back to available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCalculation {
    pub level_id: LevelId,
    pub quantity_released: i64,
    pub new_available: i64,
    pub new_reserved: i64,
}

/// Outcome of consuming a reservation at shipment (deduct-on-ship).
///
/// Shipped stock leaves `reserved` permanently; `available` is untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCalculation {
    pub level_id: LevelId,
    pub quantity_shipped: i64,
    pub new_reserved: i64,
}

/// Compute the reservation for one order item against its candidate levels.
///
/// First-fit: the first level whose `available` covers the requested quantity
/// wins. No splitting across warehouses, no best-fit optimization.
///
/// Fails `InvalidQuantity` for a quantity below 1, `InsufficientStock` when no
/// single level can satisfy the request (reporting the summed `available`
/// across all candidates), and `CapacityExceeded` when the resulting
/// `reserved` would pass [`MAX_INVENTORY_QUANTITY`].
pub fn calculate_reservation(
    item: &OrderItem,
    candidate_levels: &[InventoryLevel],
) -> DomainResult<ReservationCalculation> {
    if item.quantity < 1 {
        return Err(DomainError::invalid_quantity(item.quantity));
    }

    let Some(level) = candidate_levels.iter().find(|l| l.available >= item.quantity) else {
        let available: i64 = candidate_levels.iter().map(|l| l.available).sum();
        return Err(DomainError::insufficient_stock(
            &item.sku_label,
            item.quantity,
            available,
        ));
    };

    let new_reserved = level.reserved + item.quantity;
    if new_reserved > MAX_INVENTORY_QUANTITY {
        return Err(DomainError::capacity_exceeded(MAX_INVENTORY_QUANTITY));
    }

    Ok(ReservationCalculation {
        level_id: level.id,
        warehouse_id: level.warehouse_id,
        sku_id: level.sku_id,
        quantity: item.quantity,
        new_available: level.available - item.quantity,
        new_reserved,
    })
}

/// Compute reservations for a whole order.
///
/// Items are sorted by `sku_id` ascending *before* any lookup. This ordering
/// is a deadlock-avoidance contract: concurrent transactions touching
/// overlapping SKU sets must acquire row locks in the same global order, and a
/// consistent sort eliminates circular waits without a lock manager. Every
/// caller that reserves stock for multiple SKUs must go through this function.
///
/// `lookup` is an injected capability (typically the store's `levels_for_sku`),
/// so the calculator stays free of any storage dependency; its error type
/// flows through unchanged. Fail-fast: the first item failure aborts the whole
/// computation.
pub async fn calculate_reservations_for_order<F, Fut, E>(
    items: &[OrderItem],
    mut lookup: F,
) -> Result<Vec<ReservationCalculation>, E>
where
    F: FnMut(SkuId) -> Fut,
    Fut: Future<Output = Result<Vec<InventoryLevel>, E>>,
    E: From<DomainError>,
{
    let mut sorted: Vec<&OrderItem> = items.iter().collect();
    sorted.sort_by(|a, b| a.sku_id.cmp(&b.sku_id));

    let mut calculations = Vec::with_capacity(sorted.len());
    for item in sorted {
        let levels = lookup(item.sku_id).await?;
        calculations.push(calculate_reservation(item, &levels)?);
    }

    Ok(calculations)
}

/// Compute the level delta for releasing a reservation (e.g. cancellation).
///
/// Not idempotent by design: a reservation whose `released_at` is already set
/// fails `AlreadyReleased`; double-release is an integrity error, not a
/// no-op. `new_reserved` is clamped at zero against drift.
pub fn calculate_release(
    reservation: &Reservation,
    level: &InventoryLevel,
) -> DomainResult<ReleaseCalculation> {
    if reservation.released_at.is_some() {
        return Err(DomainError::already_released());
    }

    Ok(ReleaseCalculation {
        level_id: level.id,
        quantity_released: reservation.quantity_reserved,
        new_available: level.available + reservation.quantity_reserved,
        new_reserved: (level.reserved - reservation.quantity_reserved).max(0),
    })
}

/// Compute the level delta for shipping a reservation (deduct-on-ship).
///
/// Removes the committed quantity from `reserved` permanently, without
/// returning it to `available`. Terminal reservations fail `AlreadyReleased`;
/// `new_reserved` is clamped at zero against drift.
pub fn calculate_shipment(
    reservation: &Reservation,
    level: &InventoryLevel,
) -> DomainResult<ShipmentCalculation> {
    if reservation.released_at.is_some() {
        return Err(DomainError::already_released());
    }

    Ok(ShipmentCalculation {
        level_id: level.id,
        quantity_shipped: reservation.quantity_reserved,
        new_reserved: (level.reserved - reservation.quantity_reserved).max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depot_core::{OrderId, ReservationId, TenantId};
    use uuid::Uuid;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_level(available: i64, reserved: i64) -> InventoryLevel {
        InventoryLevel {
            id: LevelId::new(),
            tenant_id: test_tenant_id(),
            sku_id: SkuId::new(),
            warehouse_id: WarehouseId::new(),
            available,
            reserved,
            damaged: None,
        }
    }

    fn test_item(sku_id: SkuId, quantity: i64) -> OrderItem {
        OrderItem {
            sku_id,
            quantity,
            sku_label: "Blue Widget".to_string(),
        }
    }

    fn test_reservation(quantity_reserved: i64, level: &InventoryLevel) -> Reservation {
        Reservation {
            id: ReservationId::new(),
            tenant_id: level.tenant_id,
            order_id: OrderId::new(),
            sku_id: level.sku_id,
            warehouse_id: level.warehouse_id,
            quantity_reserved,
            released_at: None,
        }
    }

    #[test]
    fn reservation_moves_stock_from_available_to_reserved() {
        let level = test_level(10, 0);
        let item = test_item(level.sku_id, 4);

        let calc = calculate_reservation(&item, std::slice::from_ref(&level)).unwrap();
        assert_eq!(calc.level_id, level.id);
        assert_eq!(calc.warehouse_id, level.warehouse_id);
        assert_eq!(calc.quantity, 4);
        assert_eq!(calc.new_available, 6);
        assert_eq!(calc.new_reserved, 4);
    }

    #[test]
    fn first_fit_skips_levels_without_enough_available() {
        let sku_id = SkuId::new();
        let mut short = test_level(2, 0);
        short.sku_id = sku_id;
        let mut enough = test_level(10, 0);
        enough.sku_id = sku_id;
        let mut bigger = test_level(20, 0);
        bigger.sku_id = sku_id;

        let calc =
            calculate_reservation(&test_item(sku_id, 5), &[short, enough.clone(), bigger]).unwrap();
        assert_eq!(calc.level_id, enough.id);
    }

    #[test]
    fn insufficient_stock_reports_summed_available() {
        let level = test_level(3, 0);
        let err = calculate_reservation(&test_item(level.sku_id, 5), &[level]).unwrap_err();
        match err {
            DomainError::InsufficientStock {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 5);
                assert_eq!(available, 3);
            }
            _ => panic!("Expected InsufficientStock"),
        }
    }

    #[test]
    fn no_split_across_levels_even_when_sum_is_enough() {
        let sku_id = SkuId::new();
        let mut a = test_level(3, 0);
        a.sku_id = sku_id;
        let mut b = test_level(4, 0);
        b.sku_id = sku_id;

        let err = calculate_reservation(&test_item(sku_id, 5), &[a, b]).unwrap_err();
        match err {
            DomainError::InsufficientStock { available, .. } => assert_eq!(available, 7),
            _ => panic!("Expected InsufficientStock"),
        }
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        let level = test_level(10, 0);

        for qty in [0, -3] {
            let err =
                calculate_reservation(&test_item(level.sku_id, qty), std::slice::from_ref(&level))
                    .unwrap_err();
            match err {
                DomainError::InvalidQuantity { got } => assert_eq!(got, qty),
                _ => panic!("Expected InvalidQuantity"),
            }
        }
    }

    #[test]
    fn reservation_cannot_push_reserved_past_the_ceiling() {
        let level = test_level(10, MAX_INVENTORY_QUANTITY - 1);
        let err =
            calculate_reservation(&test_item(level.sku_id, 2), &[level]).unwrap_err();
        match err {
            DomainError::CapacityExceeded { limit } => {
                assert_eq!(limit, MAX_INVENTORY_QUANTITY)
            }
            _ => panic!("Expected CapacityExceeded"),
        }
    }

    #[tokio::test]
    async fn order_items_are_processed_in_sku_order() {
        let sku_a = SkuId::from_uuid(Uuid::from_u128(1));
        let sku_b = SkuId::from_uuid(Uuid::from_u128(2));
        let items = vec![test_item(sku_b, 2), test_item(sku_a, 1)];

        let mut lookups = Vec::new();
        let calcs = calculate_reservations_for_order(&items, |sku| {
            lookups.push(sku);
            let mut level = test_level(10, 0);
            level.sku_id = sku;
            async move { Ok::<_, DomainError>(vec![level]) }
        })
        .await
        .unwrap();

        assert_eq!(lookups, vec![sku_a, sku_b]);
        assert_eq!(calcs[0].sku_id, sku_a);
        assert_eq!(calcs[1].sku_id, sku_b);
    }

    #[tokio::test]
    async fn order_calculation_fails_fast_on_first_bad_item() {
        let sku_a = SkuId::from_uuid(Uuid::from_u128(1));
        let sku_b = SkuId::from_uuid(Uuid::from_u128(2));
        let sku_c = SkuId::from_uuid(Uuid::from_u128(3));
        let items = vec![
            test_item(sku_a, 1),
            test_item(sku_b, 50),
            test_item(sku_c, 1),
        ];

        let mut lookups = Vec::new();
        let result = calculate_reservations_for_order(&items, |sku| {
            lookups.push(sku);
            let mut level = test_level(10, 0);
            level.sku_id = sku;
            async move { Ok::<_, DomainError>(vec![level]) }
        })
        .await;

        match result.unwrap_err() {
            DomainError::InsufficientStock { required, .. } => assert_eq!(required, 50),
            _ => panic!("Expected InsufficientStock"),
        }
        // The failing item aborts the computation; sku_c is never looked up.
        assert_eq!(lookups, vec![sku_a, sku_b]);
    }

    #[test]
    fn release_returns_stock_to_available() {
        let level = test_level(10, 5);
        let reservation = test_reservation(5, &level);

        let calc = calculate_release(&reservation, &level).unwrap();
        assert_eq!(calc.quantity_released, 5);
        assert_eq!(calc.new_available, 15);
        assert_eq!(calc.new_reserved, 0);
    }

    #[test]
    fn release_clamps_reserved_at_zero_against_drift() {
        let level = test_level(10, 3);
        let reservation = test_reservation(5, &level);

        let calc = calculate_release(&reservation, &level).unwrap();
        assert_eq!(calc.new_available, 15);
        assert_eq!(calc.new_reserved, 0);
    }

    #[test]
    fn released_reservation_cannot_be_released_again() {
        let level = test_level(10, 5);
        let mut reservation = test_reservation(5, &level);
        reservation.released_at = Some(Utc::now());

        let err = calculate_release(&reservation, &level).unwrap_err();
        assert_eq!(err, DomainError::AlreadyReleased);
    }

    #[test]
    fn shipment_consumes_reserved_without_touching_available() {
        let level = test_level(10, 5);
        let reservation = test_reservation(5, &level);

        let calc = calculate_shipment(&reservation, &level).unwrap();
        assert_eq!(calc.quantity_shipped, 5);
        assert_eq!(calc.new_reserved, 0);
    }

    #[test]
    fn released_reservation_cannot_be_shipped() {
        let level = test_level(10, 5);
        let mut reservation = test_reservation(5, &level);
        reservation.released_at = Some(Utc::now());

        let err = calculate_shipment(&reservation, &level).unwrap_err();
        assert_eq!(err, DomainError::AlreadyReleased);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: a successful reservation moves stock, never creates or
            /// destroys it.
            #[test]
            fn reservation_conserves_stock(
                available in 0i64..10_000,
                reserved in 0i64..10_000,
                quantity in 1i64..10_000,
            ) {
                let level = test_level(available, reserved);
                let item = test_item(level.sku_id, quantity);

                if let Ok(calc) = calculate_reservation(&item, std::slice::from_ref(&level)) {
                    prop_assert_eq!(
                        calc.new_available + calc.new_reserved,
                        available + reserved
                    );
                    prop_assert!(calc.new_available >= 0);
                    prop_assert!(calc.new_reserved >= 0);
                }
            }

            /// Property: when no single level covers the request, the failure is
            /// always `InsufficientStock` with the correct summed total.
            #[test]
            fn undersupplied_request_always_fails_with_summed_total(
                availables in prop::collection::vec(0i64..100, 1..8),
                extra in 1i64..100,
            ) {
                let sku_id = SkuId::new();
                let levels: Vec<InventoryLevel> = availables
                    .iter()
                    .map(|&a| {
                        let mut level = test_level(a, 0);
                        level.sku_id = sku_id;
                        level
                    })
                    .collect();

                // Request more than any single level holds.
                let max_single = availables.iter().copied().max().unwrap_or(0);
                let quantity = max_single + extra;

                let err = calculate_reservation(&test_item(sku_id, quantity), &levels).unwrap_err();
                match err {
                    DomainError::InsufficientStock { required, available, .. } => {
                        prop_assert_eq!(required, quantity);
                        prop_assert_eq!(available, availables.iter().sum::<i64>());
                    }
                    other => prop_assert!(false, "Expected InsufficientStock, got {other:?}"),
                }
            }

            /// Property: per-order processing order is a function of the item
            /// set, not of its permutation.
            #[test]
            fn order_processing_is_permutation_independent(
                skus in prop::collection::vec(any::<u128>(), 1..8).prop_shuffle(),
            ) {
                let items: Vec<OrderItem> = skus
                    .iter()
                    .map(|&raw| test_item(SkuId::from_uuid(Uuid::from_u128(raw)), 1))
                    .collect();
                let mut reversed = items.clone();
                reversed.reverse();

                let runtime = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();

                let lookup = |sku: SkuId| {
                    let mut level = test_level(100, 0);
                    level.sku_id = sku;
                    async move { Ok::<_, DomainError>(vec![level]) }
                };

                let forward = runtime
                    .block_on(calculate_reservations_for_order(&items, lookup))
                    .unwrap();
                let backward = runtime
                    .block_on(calculate_reservations_for_order(&reversed, lookup))
                    .unwrap();

                let forward_skus: Vec<SkuId> = forward.iter().map(|c| c.sku_id).collect();
                let backward_skus: Vec<SkuId> = backward.iter().map(|c| c.sku_id).collect();
                prop_assert_eq!(&forward_skus, &backward_skus);

                let mut expected: Vec<SkuId> = items.iter().map(|i| i.sku_id).collect();
                expected.sort();
                prop_assert_eq!(forward_skus, expected);
            }

            /// Property: release restores conservation and never leaves a
            /// negative `reserved`.
            #[test]
            fn release_never_goes_negative(
                available in 0i64..10_000,
                reserved in 0i64..10_000,
                quantity in 1i64..10_000,
            ) {
                let level = test_level(available, reserved);
                let reservation = test_reservation(quantity, &level);

                let calc = calculate_release(&reservation, &level).unwrap();
                prop_assert_eq!(calc.new_available, available + quantity);
                prop_assert!(calc.new_reserved >= 0);

                let shipment = calculate_shipment(&reservation, &level).unwrap();
                prop_assert!(shipment.new_reserved >= 0);
                prop_assert_eq!(shipment.quantity_shipped, quantity);
            }
        }
    }
}
