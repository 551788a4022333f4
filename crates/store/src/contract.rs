//! The inventory store contract.
//!
//! An abstract, tenant-scoped data-access boundary exposing exactly the
//! operations the reservation calculator and orchestrator need. Two
//! realizations ship with the engine: [`crate::PostgresInventoryStore`]
//! (transactional, production) and [`crate::InMemoryInventoryStore`]
//! (deterministic, tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use depot_allocation::{
    Adjustment, InventoryLevel, Order, ReleaseCalculation, Reservation, ReservationCalculation,
    ShipmentCalculation,
};
use depot_core::{
    ActorId, DomainError, LevelId, OrderId, ReservationId, SkuId, TenantId, WarehouseId,
    MAX_INVENTORY_QUANTITY,
};

/// Store operation error.
///
/// Infrastructure failures (connection loss, write conflicts) stay out of
/// [`DomainError`]; deterministic business failures pass through unchanged via
/// the `Domain` variant.
///
/// `Conflict` means a concurrent writer invalidated this operation's reads;
/// the orchestrator retries the whole per-order sequence with fresh reads.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found() -> Self {
        Self::Domain(DomainError::NotFound)
    }

    /// Conflicts are the only retryable kind; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Partial update of an inventory level. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub available: Option<i64>,
    pub reserved: Option<i64>,
    pub damaged: Option<i64>,
}

impl LevelUpdate {
    pub fn is_empty(&self) -> bool {
        self.available.is_none() && self.reserved.is_none() && self.damaged.is_none()
    }

    /// Every provided field must stay within `0..=MAX_INVENTORY_QUANTITY`.
    /// Violations are collected, not short-circuited.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("available", self.available),
            ("reserved", self.reserved),
            ("damaged", self.damaged),
        ] {
            if let Some(v) = value {
                if v < 0 {
                    errors.push(format!("{name} cannot be negative"));
                } else if v > MAX_INVENTORY_QUANTITY {
                    errors.push(format!("{name} cannot exceed {MAX_INVENTORY_QUANTITY}"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation_failed(errors))
        }
    }
}

/// Input for creating a reservation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub quantity_reserved: i64,
}

/// Input for appending an audit adjustment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub quantity_delta: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Pagination parameters for level listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50, // Safe default
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000), // Cap at 1000 for safety
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for level listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFilter {
    pub sku_id: Option<SkuId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Only levels with `available == 0`.
    pub out_of_stock_only: bool,
}

/// Paginated level listing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPage {
    pub levels: Vec<InventoryLevel>,
    /// Total number of levels matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Tenant-scoped inventory store.
///
/// ## Tenant Isolation
///
/// Every lookup that accepts an external identifier (level id, reservation id,
/// order id) also requires the tenant id, and must answer "not found" (never a
/// distinguishable "forbidden") when the identifier exists but belongs to a
/// different tenant. Existence must not leak across tenants. This holds for
/// every realization.
///
/// ## Atomicity
///
/// The compound operations (`commit_order_reservations`,
/// `release_reservation`, `consume_reservation`, `record_adjustment`) are
/// *logical operations*: each executes atomically, so a mid-sequence failure
/// leaves no partial state. In particular, reserving an order is all-or-nothing
/// across its items.
///
/// ## Concurrency
///
/// Level mutations re-validate against current state (`available` must still
/// cover the quantity, ceilings must hold). A calculation computed from reads
/// that a concurrent writer has since invalidated fails with
/// [`StoreError::Conflict`]; callers retry with fresh reads. This guard is
/// what makes "no oversell" a joint property of sorted processing plus store
/// isolation.
///
/// ## Candidate Ordering
///
/// `levels_for_sku` returns levels in level-id order (UUIDv7, so creation
/// order) in every realization, keeping first-fit deterministic across stores.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Look up one level by id.
    async fn level_by_id(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
    ) -> Result<Option<InventoryLevel>, StoreError>;

    /// All levels holding a SKU, across warehouses, in level-id order.
    async fn levels_for_sku(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
    ) -> Result<Vec<InventoryLevel>, StoreError>;

    /// The level for a (SKU, warehouse) pair; the oldest row if several
    /// exist.
    async fn level_for_warehouse(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryLevel>, StoreError>;

    /// Paginated, filterable listing of a tenant's levels, ordered by
    /// (sku_id, warehouse_id).
    async fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: LevelFilter,
        pagination: Pagination,
    ) -> Result<LevelPage, StoreError>;

    /// Partial level update. Provided fields must stay within
    /// `0..=MAX_INVENTORY_QUANTITY`.
    async fn update_level(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        update: LevelUpdate,
    ) -> Result<InventoryLevel, StoreError>;

    /// Create a reservation row (no level mutation). Fails `InvalidQuantity`
    /// below 1.
    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, StoreError>;

    /// All reservations created for an order, in SKU order.
    async fn reservations_for_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Atomically persist one order's reservations: every level delta plus a
    /// reservation row per calculation, or nothing at all.
    ///
    /// Implementations must re-validate each level against current state
    /// (`available >= quantity`, reserved ceiling) and fail the whole batch
    /// with `Conflict` when a calculation has gone stale.
    async fn commit_order_reservations(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        calculations: &[ReservationCalculation],
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Atomically release a reservation: set `released_at` (one-way; fails
    /// `AlreadyReleased` when already set) and return the stock to
    /// `available`.
    async fn release_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        release: &ReleaseCalculation,
        released_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError>;

    /// Atomically consume a reservation at shipment: mark it terminal and
    /// remove the quantity from `reserved` without touching `available`.
    async fn consume_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        shipment: &ShipmentCalculation,
        shipped_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError>;

    /// Append an audit adjustment record (write-only log; no update or delete
    /// exists).
    async fn append_adjustment(&self, adjustment: NewAdjustment)
        -> Result<Adjustment, StoreError>;

    /// Atomically apply an adjusted `available` to a level and append the
    /// audit record.
    async fn record_adjustment(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        new_available: i64,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError>;

    /// Look up an order with its line items.
    async fn order_with_items(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn level_by_id(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        (**self).level_by_id(tenant_id, level_id).await
    }

    async fn levels_for_sku(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
    ) -> Result<Vec<InventoryLevel>, StoreError> {
        (**self).levels_for_sku(tenant_id, sku_id).await
    }

    async fn level_for_warehouse(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        (**self)
            .level_for_warehouse(tenant_id, sku_id, warehouse_id)
            .await
    }

    async fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: LevelFilter,
        pagination: Pagination,
    ) -> Result<LevelPage, StoreError> {
        (**self).list_levels(tenant_id, filter, pagination).await
    }

    async fn update_level(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        update: LevelUpdate,
    ) -> Result<InventoryLevel, StoreError> {
        (**self).update_level(tenant_id, level_id, update).await
    }

    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, StoreError> {
        (**self).create_reservation(reservation).await
    }

    async fn reservations_for_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).reservations_for_order(tenant_id, order_id).await
    }

    async fn commit_order_reservations(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        calculations: &[ReservationCalculation],
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self)
            .commit_order_reservations(tenant_id, order_id, calculations)
            .await
    }

    async fn release_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        release: &ReleaseCalculation,
        released_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        (**self)
            .release_reservation(tenant_id, reservation_id, release, released_at)
            .await
    }

    async fn consume_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        shipment: &ShipmentCalculation,
        shipped_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        (**self)
            .consume_reservation(tenant_id, reservation_id, shipment, shipped_at)
            .await
    }

    async fn append_adjustment(
        &self,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError> {
        (**self).append_adjustment(adjustment).await
    }

    async fn record_adjustment(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        new_available: i64,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError> {
        (**self)
            .record_adjustment(tenant_id, level_id, new_available, adjustment)
            .await
    }

    async fn order_with_items(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError> {
        (**self).order_with_items(tenant_id, order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_update_validation_collects_all_violations() {
        let update = LevelUpdate {
            available: Some(-1),
            reserved: Some(MAX_INVENTORY_QUANTITY + 1),
            damaged: None,
        };

        let err = update.validate().unwrap_err();
        match err {
            DomainError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("available"));
                assert!(errors[1].contains("reserved"));
            }
            _ => panic!("Expected ValidationFailed"),
        }
    }

    #[test]
    fn pagination_caps_the_limit() {
        let pagination = Pagination::new(Some(10_000), None);
        assert_eq!(pagination.limit, 1000);
        assert_eq!(pagination.offset, 0);

        assert_eq!(Pagination::default().limit, 50);
    }
}
