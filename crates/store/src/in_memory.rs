//! In-memory inventory store.
//!
//! Intended for deterministic tests and local development. Not optimized for
//! performance. The instance is caller-owned: no process-wide state, no
//! global counters (identifiers are UUIDv7).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use depot_allocation::{
    Adjustment, InventoryLevel, Order, ReleaseCalculation, Reservation, ReservationCalculation,
    ShipmentCalculation,
};
use depot_core::{
    AdjustmentId, DomainError, LevelId, OrderId, ReservationId, SkuId, TenantId, WarehouseId,
    MAX_INVENTORY_QUANTITY,
};

use crate::contract::{
    InventoryStore, LevelFilter, LevelPage, LevelUpdate, NewAdjustment, NewReservation,
    Pagination, StoreError,
};

/// In-memory realization of [`InventoryStore`].
///
/// Compound operations take all their write locks up front (levels, then
/// reservations, then adjustments, always in that order) and stage changes
/// before applying them, so a mid-batch failure leaves no partial state,
/// matching the transactional realization.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    levels: RwLock<HashMap<(TenantId, LevelId), InventoryLevel>>,
    reservations: RwLock<HashMap<(TenantId, ReservationId), Reservation>>,
    adjustments: RwLock<Vec<Adjustment>>,
    orders: RwLock<HashMap<(TenantId, OrderId), Order>>,
}

fn poisoned() -> StoreError {
    StoreError::storage("lock poisoned")
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a level (tests). Overwrites any existing row with the same id.
    pub fn seed_level(&self, level: InventoryLevel) {
        if let Ok(mut levels) = self.levels.write() {
            levels.insert((level.tenant_id, level.id), level);
        }
    }

    /// Seed an order with its items (tests).
    pub fn seed_order(&self, order: Order) {
        if let Ok(mut orders) = self.orders.write() {
            orders.insert((order.tenant_id, order.id), order);
        }
    }

    /// Drop all state.
    pub fn clear(&self) {
        if let Ok(mut levels) = self.levels.write() {
            levels.clear();
        }
        if let Ok(mut reservations) = self.reservations.write() {
            reservations.clear();
        }
        if let Ok(mut adjustments) = self.adjustments.write() {
            adjustments.clear();
        }
        if let Ok(mut orders) = self.orders.write() {
            orders.clear();
        }
    }

    /// Inspect a level without going through the async contract (tests).
    pub fn level_snapshot(&self, tenant_id: TenantId, level_id: LevelId) -> Option<InventoryLevel> {
        let levels = self.levels.read().ok()?;
        levels.get(&(tenant_id, level_id)).cloned()
    }

    /// Inspect a tenant's audit log, in append order (tests).
    pub fn adjustments_snapshot(&self, tenant_id: TenantId) -> Vec<Adjustment> {
        match self.adjustments.read() {
            Ok(adjustments) => adjustments
                .iter()
                .filter(|a| a.tenant_id == tenant_id)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }

    fn sorted_levels_for_sku(
        levels: &HashMap<(TenantId, LevelId), InventoryLevel>,
        tenant_id: TenantId,
        sku_id: SkuId,
    ) -> Vec<InventoryLevel> {
        let mut matching: Vec<InventoryLevel> = levels
            .iter()
            .filter(|((t, _), l)| *t == tenant_id && l.sku_id == sku_id)
            .map(|(_, l)| l.clone())
            .collect();
        // Level-id order = creation order (UUIDv7); keeps first-fit
        // deterministic and identical to the Postgres realization.
        matching.sort_by_key(|l| l.id);
        matching
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn level_by_id(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        let levels = self.levels.read().map_err(|_| poisoned())?;
        Ok(levels.get(&(tenant_id, level_id)).cloned())
    }

    async fn levels_for_sku(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
    ) -> Result<Vec<InventoryLevel>, StoreError> {
        let levels = self.levels.read().map_err(|_| poisoned())?;
        Ok(Self::sorted_levels_for_sku(&levels, tenant_id, sku_id))
    }

    async fn level_for_warehouse(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        let levels = self.levels.read().map_err(|_| poisoned())?;
        Ok(Self::sorted_levels_for_sku(&levels, tenant_id, sku_id)
            .into_iter()
            .find(|l| l.warehouse_id == warehouse_id))
    }

    async fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: LevelFilter,
        pagination: Pagination,
    ) -> Result<LevelPage, StoreError> {
        let levels = self.levels.read().map_err(|_| poisoned())?;

        let mut matching: Vec<InventoryLevel> = levels
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, l)| l.clone())
            .filter(|l| filter.sku_id.is_none_or(|sku| l.sku_id == sku))
            .filter(|l| filter.warehouse_id.is_none_or(|w| l.warehouse_id == w))
            .filter(|l| !filter.out_of_stock_only || l.is_out_of_stock())
            .collect();
        matching.sort_by_key(|l| (l.sku_id, l.warehouse_id, l.id));

        let total = matching.len() as u64;
        let start = (pagination.offset as usize).min(matching.len());
        let end = (start + pagination.limit as usize).min(matching.len());
        let page: Vec<InventoryLevel> = matching[start..end].to_vec();
        let has_more = (end as u64) < total;

        Ok(LevelPage {
            levels: page,
            total,
            pagination,
            has_more,
        })
    }

    async fn update_level(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        update: LevelUpdate,
    ) -> Result<InventoryLevel, StoreError> {
        update.validate()?;

        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let level = levels
            .get_mut(&(tenant_id, level_id))
            .ok_or_else(StoreError::not_found)?;

        if let Some(available) = update.available {
            level.available = available;
        }
        if let Some(reserved) = update.reserved {
            level.reserved = reserved;
        }
        if let Some(damaged) = update.damaged {
            level.damaged = Some(damaged);
        }

        Ok(level.clone())
    }

    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, StoreError> {
        if reservation.quantity_reserved < 1 {
            return Err(DomainError::invalid_quantity(reservation.quantity_reserved).into());
        }

        let row = Reservation {
            id: ReservationId::new(),
            tenant_id: reservation.tenant_id,
            order_id: reservation.order_id,
            sku_id: reservation.sku_id,
            warehouse_id: reservation.warehouse_id,
            quantity_reserved: reservation.quantity_reserved,
            released_at: None,
        };

        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;
        reservations.insert((row.tenant_id, row.id), row.clone());
        Ok(row)
    }

    async fn reservations_for_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(|_| poisoned())?;
        let mut matching: Vec<Reservation> = reservations
            .iter()
            .filter(|((t, _), r)| *t == tenant_id && r.order_id == order_id)
            .map(|(_, r)| r.clone())
            .collect();
        matching.sort_by_key(|r| (r.sku_id, r.id));
        Ok(matching)
    }

    async fn commit_order_reservations(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        calculations: &[ReservationCalculation],
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;

        // Stage level deltas first; nothing is applied until every
        // calculation has re-validated against current state. Repeated levels
        // in one batch accumulate against the staged value, not the original.
        let mut staged: HashMap<LevelId, InventoryLevel> = HashMap::new();
        for calc in calculations {
            if calc.quantity < 1 {
                return Err(DomainError::invalid_quantity(calc.quantity).into());
            }

            let current = match staged.get(&calc.level_id) {
                Some(l) => l.clone(),
                None => levels
                    .get(&(tenant_id, calc.level_id))
                    .cloned()
                    .ok_or_else(StoreError::not_found)?,
            };

            if current.available < calc.quantity {
                return Err(StoreError::conflict(format!(
                    "stale level read for level {} (available {}, needed {})",
                    calc.level_id, current.available, calc.quantity
                )));
            }
            if current.reserved + calc.quantity > MAX_INVENTORY_QUANTITY {
                return Err(DomainError::capacity_exceeded(MAX_INVENTORY_QUANTITY).into());
            }

            let mut next = current;
            next.available -= calc.quantity;
            next.reserved += calc.quantity;
            staged.insert(calc.level_id, next);
        }

        for (level_id, level) in staged {
            levels.insert((tenant_id, level_id), level);
        }

        let mut committed = Vec::with_capacity(calculations.len());
        for calc in calculations {
            let row = Reservation {
                id: ReservationId::new(),
                tenant_id,
                order_id,
                sku_id: calc.sku_id,
                warehouse_id: calc.warehouse_id,
                quantity_reserved: calc.quantity,
                released_at: None,
            };
            reservations.insert((tenant_id, row.id), row.clone());
            committed.push(row);
        }

        Ok(committed)
    }

    async fn release_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        release: &ReleaseCalculation,
        released_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;

        let reservation = reservations
            .get(&(tenant_id, reservation_id))
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        if reservation.released_at.is_some() {
            return Err(DomainError::already_released().into());
        }

        let level = levels
            .get(&(tenant_id, release.level_id))
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        if level.available + release.quantity_released > MAX_INVENTORY_QUANTITY {
            return Err(StoreError::conflict(format!(
                "release would push level {} past the inventory ceiling",
                release.level_id
            )));
        }

        let mut next = level;
        next.available += release.quantity_released;
        next.reserved = (next.reserved - release.quantity_released).max(0);
        levels.insert((tenant_id, next.id), next);

        let released = reservations
            .get_mut(&(tenant_id, reservation_id))
            .ok_or_else(StoreError::not_found)?;
        released.released_at = Some(released_at);
        Ok(released.clone())
    }

    async fn consume_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        shipment: &ShipmentCalculation,
        shipped_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;

        let reservation = reservations
            .get(&(tenant_id, reservation_id))
            .cloned()
            .ok_or_else(StoreError::not_found)?;
        if reservation.released_at.is_some() {
            return Err(DomainError::already_released().into());
        }

        let level = levels
            .get_mut(&(tenant_id, shipment.level_id))
            .ok_or_else(StoreError::not_found)?;
        level.reserved = (level.reserved - shipment.quantity_shipped).max(0);

        let consumed = reservations
            .get_mut(&(tenant_id, reservation_id))
            .ok_or_else(StoreError::not_found)?;
        consumed.released_at = Some(shipped_at);
        Ok(consumed.clone())
    }

    async fn append_adjustment(
        &self,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError> {
        let row = Adjustment {
            id: AdjustmentId::new(),
            tenant_id: adjustment.tenant_id,
            sku_id: adjustment.sku_id,
            warehouse_id: adjustment.warehouse_id,
            quantity_delta: adjustment.quantity_delta,
            reason: adjustment.reason,
            reference: adjustment.reference,
            actor: adjustment.actor,
            occurred_at: adjustment.occurred_at,
        };

        let mut adjustments = self.adjustments.write().map_err(|_| poisoned())?;
        adjustments.push(row.clone());
        Ok(row)
    }

    async fn record_adjustment(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        new_available: i64,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError> {
        if !(0..=MAX_INVENTORY_QUANTITY).contains(&new_available) {
            return Err(DomainError::validation_failed(vec![format!(
                "available must stay within 0..={MAX_INVENTORY_QUANTITY} (got {new_available})"
            )])
            .into());
        }

        let mut levels = self.levels.write().map_err(|_| poisoned())?;
        let mut adjustments = self.adjustments.write().map_err(|_| poisoned())?;

        let level = levels
            .get_mut(&(tenant_id, level_id))
            .ok_or_else(StoreError::not_found)?;
        level.available = new_available;

        let row = Adjustment {
            id: AdjustmentId::new(),
            tenant_id: adjustment.tenant_id,
            sku_id: adjustment.sku_id,
            warehouse_id: adjustment.warehouse_id,
            quantity_delta: adjustment.quantity_delta,
            reason: adjustment.reason,
            reference: adjustment.reference,
            actor: adjustment.actor,
            occurred_at: adjustment.occurred_at,
        };
        adjustments.push(row.clone());
        Ok(row)
    }

    async fn order_with_items(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().map_err(|_| poisoned())?;
        Ok(orders.get(&(tenant_id, order_id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_allocation::OrderItem;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_level(tenant_id: TenantId, available: i64, reserved: i64) -> InventoryLevel {
        InventoryLevel {
            id: LevelId::new(),
            tenant_id,
            sku_id: SkuId::new(),
            warehouse_id: WarehouseId::new(),
            available,
            reserved,
            damaged: None,
        }
    }

    fn calc_for(level: &InventoryLevel, quantity: i64) -> ReservationCalculation {
        ReservationCalculation {
            level_id: level.id,
            warehouse_id: level.warehouse_id,
            sku_id: level.sku_id,
            quantity,
            new_available: level.available - quantity,
            new_reserved: level.reserved + quantity,
        }
    }

    #[tokio::test]
    async fn cross_tenant_lookups_report_not_found() {
        let store = InMemoryInventoryStore::new();
        let tenant_a = test_tenant_id();
        let tenant_b = test_tenant_id();
        let level = test_level(tenant_a, 10, 0);
        store.seed_level(level.clone());

        assert!(store
            .level_by_id(tenant_b, level.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .levels_for_sku(tenant_b, level.sku_id)
            .await
            .unwrap()
            .is_empty());

        let order = Order {
            id: OrderId::new(),
            tenant_id: tenant_a,
            items: vec![],
        };
        store.seed_order(order.clone());
        assert!(store
            .order_with_items(tenant_b, order.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let healthy = test_level(tenant_id, 10, 0);
        let short = test_level(tenant_id, 1, 0);
        store.seed_level(healthy.clone());
        store.seed_level(short.clone());

        let order_id = OrderId::new();
        let err = store
            .commit_order_reservations(
                tenant_id,
                order_id,
                &[calc_for(&healthy, 4), calc_for(&short, 5)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // First calculation must not have been applied.
        let snapshot = store.level_snapshot(tenant_id, healthy.id).unwrap();
        assert_eq!(snapshot.available, 10);
        assert_eq!(snapshot.reserved, 0);
        assert!(store
            .reservations_for_order(tenant_id, order_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn repeated_level_in_one_batch_validates_against_staged_state() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 0);
        store.seed_level(level.clone());

        // 6 + 6 > 10: the second calculation must see the staged 4, not the
        // original 10.
        let err = store
            .commit_order_reservations(
                tenant_id,
                OrderId::new(),
                &[calc_for(&level, 6), calc_for(&level, 6)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let snapshot = store.level_snapshot(tenant_id, level.id).unwrap();
        assert_eq!(snapshot.available, 10);
    }

    #[tokio::test]
    async fn commit_applies_deltas_and_creates_rows() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 2);
        store.seed_level(level.clone());

        let order_id = OrderId::new();
        let committed = store
            .commit_order_reservations(tenant_id, order_id, &[calc_for(&level, 4)])
            .await
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].quantity_reserved, 4);
        assert_eq!(committed[0].order_id, order_id);
        assert!(committed[0].released_at.is_none());

        let snapshot = store.level_snapshot(tenant_id, level.id).unwrap();
        assert_eq!(snapshot.available, 6);
        assert_eq!(snapshot.reserved, 6);
    }

    #[tokio::test]
    async fn release_is_one_way() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 0);
        store.seed_level(level.clone());

        let committed = store
            .commit_order_reservations(tenant_id, OrderId::new(), &[calc_for(&level, 4)])
            .await
            .unwrap();
        let reservation = &committed[0];

        let release = ReleaseCalculation {
            level_id: level.id,
            quantity_released: 4,
            new_available: 10,
            new_reserved: 0,
        };
        let released = store
            .release_reservation(tenant_id, reservation.id, &release, Utc::now())
            .await
            .unwrap();
        assert!(released.released_at.is_some());

        let snapshot = store.level_snapshot(tenant_id, level.id).unwrap();
        assert_eq!(snapshot.available, 10);
        assert_eq!(snapshot.reserved, 0);

        let err = store
            .release_reservation(tenant_id, reservation.id, &release, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::AlreadyReleased)
        ));
    }

    #[tokio::test]
    async fn consume_removes_reserved_without_restoring_available() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 0);
        store.seed_level(level.clone());

        let committed = store
            .commit_order_reservations(tenant_id, OrderId::new(), &[calc_for(&level, 4)])
            .await
            .unwrap();

        let shipment = ShipmentCalculation {
            level_id: level.id,
            quantity_shipped: 4,
            new_reserved: 0,
        };
        store
            .consume_reservation(tenant_id, committed[0].id, &shipment, Utc::now())
            .await
            .unwrap();

        let snapshot = store.level_snapshot(tenant_id, level.id).unwrap();
        assert_eq!(snapshot.available, 6);
        assert_eq!(snapshot.reserved, 0);
    }

    #[tokio::test]
    async fn update_level_applies_only_provided_fields() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 5);
        store.seed_level(level.clone());

        let updated = store
            .update_level(
                tenant_id,
                level.id,
                LevelUpdate {
                    available: Some(20),
                    reserved: None,
                    damaged: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.available, 20);
        assert_eq!(updated.reserved, 5);
        assert_eq!(updated.damaged, Some(1));
    }

    #[tokio::test]
    async fn list_levels_filters_and_paginates() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        for _ in 0..3 {
            store.seed_level(test_level(tenant_id, 5, 0));
        }
        store.seed_level(test_level(tenant_id, 0, 2));

        let all = store
            .list_levels(tenant_id, LevelFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 4);
        assert!(!all.has_more);

        let out_of_stock = store
            .list_levels(
                tenant_id,
                LevelFilter {
                    out_of_stock_only: true,
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(out_of_stock.total, 1);
        assert_eq!(out_of_stock.levels[0].available, 0);

        let first_page = store
            .list_levels(
                tenant_id,
                LevelFilter::default(),
                Pagination {
                    limit: 3,
                    offset: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(first_page.levels.len(), 3);
        assert!(first_page.has_more);

        let second_page = store
            .list_levels(
                tenant_id,
                LevelFilter::default(),
                Pagination {
                    limit: 3,
                    offset: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(second_page.levels.len(), 1);
        assert!(!second_page.has_more);
    }

    #[tokio::test]
    async fn record_adjustment_updates_level_and_appends_audit_row() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 0);
        store.seed_level(level.clone());

        let adjustment = store
            .record_adjustment(
                tenant_id,
                level.id,
                7,
                NewAdjustment {
                    tenant_id,
                    sku_id: level.sku_id,
                    warehouse_id: level.warehouse_id,
                    quantity_delta: -3,
                    reason: "damaged in transit".to_string(),
                    reference: None,
                    actor: depot_core::ActorId::new(),
                    occurred_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(adjustment.quantity_delta, -3);

        let snapshot = store.level_snapshot(tenant_id, level.id).unwrap();
        assert_eq!(snapshot.available, 7);

        let audit = store.adjustments_snapshot(tenant_id);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].reason, "damaged in transit");
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let store = InMemoryInventoryStore::new();
        let tenant_id = test_tenant_id();
        let level = test_level(tenant_id, 10, 0);
        store.seed_level(level.clone());
        store.seed_order(Order {
            id: OrderId::new(),
            tenant_id,
            items: vec![OrderItem {
                sku_id: level.sku_id,
                quantity: 1,
                sku_label: "Blue Widget".to_string(),
            }],
        });

        store.clear();
        assert!(store.level_snapshot(tenant_id, level.id).is_none());
    }
}
