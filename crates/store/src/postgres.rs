//! Postgres-backed inventory store.
//!
//! Persistent realization of [`InventoryStore`] with tenant isolation and the
//! no-oversell invariant enforced at the database level. Expected schema
//! (owned by the deployment's migrations):
//!
//! ```sql
//! CREATE TABLE inventory_levels (
//!     id           UUID PRIMARY KEY,
//!     tenant_id    UUID NOT NULL,
//!     sku_id       UUID NOT NULL,
//!     warehouse_id UUID NOT NULL,
//!     available    BIGINT NOT NULL CHECK (available >= 0),
//!     reserved     BIGINT NOT NULL CHECK (reserved >= 0),
//!     damaged      BIGINT
//! );
//!
//! CREATE TABLE reservations (
//!     id                UUID PRIMARY KEY,
//!     tenant_id         UUID NOT NULL,
//!     order_id          UUID NOT NULL,
//!     sku_id            UUID NOT NULL,
//!     warehouse_id      UUID NOT NULL,
//!     quantity_reserved BIGINT NOT NULL CHECK (quantity_reserved >= 1),
//!     released_at       TIMESTAMPTZ
//! );
//!
//! CREATE TABLE adjustments (
//!     id             UUID PRIMARY KEY,
//!     tenant_id      UUID NOT NULL,
//!     sku_id         UUID NOT NULL,
//!     warehouse_id   UUID NOT NULL,
//!     quantity_delta BIGINT NOT NULL,
//!     reason         TEXT NOT NULL,
//!     reference      TEXT,
//!     actor          UUID NOT NULL,
//!     occurred_at    TIMESTAMPTZ NOT NULL
//! );
//!
//! -- orders / order_items are owned by the intake layer; this store only
//! -- reads them.
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent writer inserted first |
//! | Database (check violation) | `23514` | `Conflict` | A guarded invariant lost a race |
//! | Database (serialization failure) | `40001` | `Conflict` | Serializable transactions collided |
//! | Database (other) | any other | `Storage` | Other database errors |
//! | PoolClosed / RowNotFound / other | N/A | `Storage` | Connection/runtime failures |
//!
//! ## Concurrency
//!
//! Reservation commits use *guarded* delta updates
//! (`SET available = available - $n ... WHERE available >= $n`): if a
//! concurrent writer drained the level between the orchestrator's read and
//! this commit, the update matches zero rows and the whole transaction rolls
//! back with `Conflict`, for the orchestrator to retry with fresh reads.
//! Stock can therefore never be oversold regardless of interleaving.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use depot_allocation::{
    Adjustment, InventoryLevel, Order, OrderItem, ReleaseCalculation, Reservation,
    ReservationCalculation, ShipmentCalculation,
};
use depot_core::{
    ActorId, AdjustmentId, DomainError, LevelId, OrderId, ReservationId, SkuId, TenantId,
    WarehouseId, MAX_INVENTORY_QUANTITY,
};

use crate::contract::{
    InventoryStore, LevelFilter, LevelPage, LevelUpdate, NewAdjustment, NewReservation,
    Pagination, StoreError,
};

/// Postgres realization of [`InventoryStore`].
///
/// Every compound operation executes inside a single transaction. Uses the
/// SQLx connection pool, which handles thread-safe connection management;
/// the store itself is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

const LEVEL_COLUMNS: &str = "id, tenant_id, sku_id, warehouse_id, available, reserved, damaged";
const RESERVATION_COLUMNS: &str =
    "id, tenant_id, order_id, sku_id, warehouse_id, quantity_reserved, released_at";
const ADJUSTMENT_COLUMNS: &str =
    "id, tenant_id, sku_id, warehouse_id, quantity_delta, reason, reference, actor, occurred_at";

#[async_trait::async_trait]
impl InventoryStore for PostgresInventoryStore {
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), level_id = %level_id.as_uuid()),
        err
    )]
    async fn level_by_id(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        let row: Option<LevelRow> = sqlx::query_as(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory_levels WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(level_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("level_by_id", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), sku_id = %sku_id.as_uuid()),
        err
    )]
    async fn levels_for_sku(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
    ) -> Result<Vec<InventoryLevel>, StoreError> {
        // Level-id order = creation order (UUIDv7); first-fit stays
        // deterministic and identical to the in-memory realization.
        let rows: Vec<LevelRow> = sqlx::query_as(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory_levels \
             WHERE tenant_id = $1 AND sku_id = $2 \
             ORDER BY id ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(sku_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("levels_for_sku", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(
        skip(self),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            sku_id = %sku_id.as_uuid(),
            warehouse_id = %warehouse_id.as_uuid()
        ),
        err
    )]
    async fn level_for_warehouse(
        &self,
        tenant_id: TenantId,
        sku_id: SkuId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<InventoryLevel>, StoreError> {
        let row: Option<LevelRow> = sqlx::query_as(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory_levels \
             WHERE tenant_id = $1 AND sku_id = $2 AND warehouse_id = $3 \
             ORDER BY id ASC LIMIT 1"
        ))
        .bind(tenant_id.as_uuid())
        .bind(sku_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("level_for_warehouse", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: LevelFilter,
        pagination: Pagination,
    ) -> Result<LevelPage, StoreError> {
        let sku = filter.sku_id.map(|s| *s.as_uuid());
        let warehouse = filter.warehouse_id.map(|w| *w.as_uuid());

        let predicate = "tenant_id = $1 \
             AND ($2::uuid IS NULL OR sku_id = $2) \
             AND ($3::uuid IS NULL OR warehouse_id = $3) \
             AND (NOT $4 OR available = 0)";

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM inventory_levels WHERE {predicate}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(sku)
        .bind(warehouse)
        .bind(filter.out_of_stock_only)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_levels", e))?;

        let rows: Vec<LevelRow> = sqlx::query_as(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory_levels WHERE {predicate} \
             ORDER BY sku_id ASC, warehouse_id ASC, id ASC \
             LIMIT $5 OFFSET $6"
        ))
        .bind(tenant_id.as_uuid())
        .bind(sku)
        .bind(warehouse)
        .bind(filter.out_of_stock_only)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_levels", e))?;

        let total = total as u64;
        let has_more = (pagination.offset as u64 + rows.len() as u64) < total;

        Ok(LevelPage {
            levels: rows.into_iter().map(Into::into).collect(),
            total,
            pagination,
            has_more,
        })
    }

    #[instrument(
        skip(self, update),
        fields(tenant_id = %tenant_id.as_uuid(), level_id = %level_id.as_uuid()),
        err
    )]
    async fn update_level(
        &self,
        tenant_id: TenantId,
        level_id: LevelId,
        update: LevelUpdate,
    ) -> Result<InventoryLevel, StoreError> {
        update.validate()?;
        if update.is_empty() {
            return self
                .level_by_id(tenant_id, level_id)
                .await?
                .ok_or_else(StoreError::not_found);
        }

        let row: Option<LevelRow> = sqlx::query_as(&format!(
            "UPDATE inventory_levels SET \
                 available = COALESCE($3, available), \
                 reserved = COALESCE($4, reserved), \
                 damaged = COALESCE($5, damaged) \
             WHERE tenant_id = $1 AND id = $2 \
             RETURNING {LEVEL_COLUMNS}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(level_id.as_uuid())
        .bind(update.available)
        .bind(update.reserved)
        .bind(update.damaged)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_level", e))?;

        row.map(Into::into).ok_or_else(StoreError::not_found)
    }

    #[instrument(
        skip(self, reservation),
        fields(
            tenant_id = %reservation.tenant_id.as_uuid(),
            order_id = %reservation.order_id.as_uuid()
        ),
        err
    )]
    async fn create_reservation(
        &self,
        reservation: NewReservation,
    ) -> Result<Reservation, StoreError> {
        if reservation.quantity_reserved < 1 {
            return Err(DomainError::invalid_quantity(reservation.quantity_reserved).into());
        }

        let row: ReservationRow = sqlx::query_as(&format!(
            "INSERT INTO reservations \
                 (id, tenant_id, order_id, sku_id, warehouse_id, quantity_reserved, released_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NULL) \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(ReservationId::new().as_uuid())
        .bind(reservation.tenant_id.as_uuid())
        .bind(reservation.order_id.as_uuid())
        .bind(reservation.sku_id.as_uuid())
        .bind(reservation.warehouse_id.as_uuid())
        .bind(reservation.quantity_reserved)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_reservation", e))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id.as_uuid()),
        err
    )]
    async fn reservations_for_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE tenant_id = $1 AND order_id = $2 \
             ORDER BY sku_id ASC, id ASC"
        ))
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reservations_for_order", e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(
        skip(self, calculations),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            order_id = %order_id.as_uuid(),
            item_count = calculations.len()
        ),
        err
    )]
    async fn commit_order_reservations(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        calculations: &[ReservationCalculation],
    ) -> Result<Vec<Reservation>, StoreError> {
        if calculations.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::with_capacity(calculations.len());
        for calc in calculations {
            if calc.quantity < 1 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(DomainError::invalid_quantity(calc.quantity).into());
            }

            // Guarded delta: zero rows means a concurrent writer drained the
            // level (or pushed reserved to the ceiling) since the
            // orchestrator's read. Roll everything back and let the caller
            // retry with fresh reads.
            let updated = sqlx::query(
                "UPDATE inventory_levels SET \
                     available = available - $3, \
                     reserved = reserved + $3 \
                 WHERE tenant_id = $1 AND id = $2 \
                   AND available >= $3 \
                   AND reserved + $3 <= $4",
            )
            .bind(tenant_id.as_uuid())
            .bind(calc.level_id.as_uuid())
            .bind(calc.quantity)
            .bind(MAX_INVENTORY_QUANTITY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit_order_reservations", e))?;

            if updated.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(StoreError::conflict(format!(
                    "stale level read for level {} (sku {})",
                    calc.level_id, calc.sku_id
                )));
            }

            let row: ReservationRow = sqlx::query_as(&format!(
                "INSERT INTO reservations \
                     (id, tenant_id, order_id, sku_id, warehouse_id, quantity_reserved, released_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, NULL) \
                 RETURNING {RESERVATION_COLUMNS}"
            ))
            .bind(ReservationId::new().as_uuid())
            .bind(tenant_id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(calc.sku_id.as_uuid())
            .bind(calc.warehouse_id.as_uuid())
            .bind(calc.quantity)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit_order_reservations", e))?;

            committed.push(row.into());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }

    #[instrument(
        skip(self, release),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            reservation_id = %reservation_id.as_uuid()
        ),
        err
    )]
    async fn release_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        release: &ReleaseCalculation,
        released_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // One-way transition guard: the WHERE clause only matches an open
        // reservation.
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "UPDATE reservations SET released_at = $3 \
             WHERE tenant_id = $1 AND id = $2 AND released_at IS NULL \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(reservation_id.as_uuid())
        .bind(released_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("release_reservation", e))?;

        let Some(row) = row else {
            let domain_err =
                reservation_terminal_failure(&mut tx, tenant_id, reservation_id).await?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(domain_err.into());
        };

        let updated = sqlx::query(
            "UPDATE inventory_levels SET \
                 available = available + $3, \
                 reserved = GREATEST(reserved - $3, 0) \
             WHERE tenant_id = $1 AND id = $2 AND available + $3 <= $4",
        )
        .bind(tenant_id.as_uuid())
        .bind(release.level_id.as_uuid())
        .bind(release.quantity_released)
        .bind(MAX_INVENTORY_QUANTITY)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("release_reservation", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::conflict(format!(
                "level {} missing or release would pass the inventory ceiling",
                release.level_id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self, shipment),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            reservation_id = %reservation_id.as_uuid()
        ),
        err
    )]
    async fn consume_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        shipment: &ShipmentCalculation,
        shipped_at: DateTime<Utc>,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "UPDATE reservations SET released_at = $3 \
             WHERE tenant_id = $1 AND id = $2 AND released_at IS NULL \
             RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(reservation_id.as_uuid())
        .bind(shipped_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("consume_reservation", e))?;

        let Some(row) = row else {
            let domain_err =
                reservation_terminal_failure(&mut tx, tenant_id, reservation_id).await?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(domain_err.into());
        };

        // Deduct-on-ship: reserved drops, available is untouched.
        let updated = sqlx::query(
            "UPDATE inventory_levels SET reserved = GREATEST(reserved - $3, 0) \
             WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(shipment.level_id.as_uuid())
        .bind(shipment.quantity_shipped)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("consume_reservation", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::not_found());
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self, adjustment),
        fields(tenant_id = %adjustment.tenant_id.as_uuid()),
        err
    )]
    async fn append_adjustment(
        &self,
        adjustment: NewAdjustment,
    ) -> Result<Adjustment, StoreError> {
        let row: AdjustmentRow = sqlx::query_as(&format!(
            "INSERT INTO adjustments \
                 (id, tenant_id, sku_id, warehouse_id, quantity_delta, reason, reference, actor, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {ADJUSTMENT_COLUMNS}"
        ))
        .bind(AdjustmentId::new().as_uuid())
        .bind(adjustment.tenant_id.as_uuid())
        .bind(adjustment.sku_id.as_uuid())
        .bind(adjustment.warehouse_id.as_uuid())
        .bind(adjustment.quantity_delta)
        .bind(&adjustment.reason)
        .bind(&adjustment.reference)
        .bind(adjustment.actor.as_uuid())
        .bind(adjustment.occurred_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_adjustment", e))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self, adjustment),
        fields(
            tenant_id = %tenant_id.as_uuid(),
            level_id = %level_id.as_uuid()
        ),
        err
    )]
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            "UPDATE inventory_levels SET available = $3 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(level_id.as_uuid())
        .bind(new_available)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_adjustment", e))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::not_found());
        }

        let row: AdjustmentRow = sqlx::query_as(&format!(
            "INSERT INTO adjustments \
                 (id, tenant_id, sku_id, warehouse_id, quantity_delta, reason, reference, actor, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {ADJUSTMENT_COLUMNS}"
        ))
        .bind(AdjustmentId::new().as_uuid())
        .bind(adjustment.tenant_id.as_uuid())
        .bind(adjustment.sku_id.as_uuid())
        .bind(adjustment.warehouse_id.as_uuid())
        .bind(adjustment.quantity_delta)
        .bind(&adjustment.reason)
        .bind(&adjustment.reference)
        .bind(adjustment.actor.as_uuid())
        .bind(adjustment.occurred_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_adjustment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(row.into())
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id.as_uuid()),
        err
    )]
    async fn order_with_items(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError> {
        let order: Option<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT id, tenant_id FROM orders WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_with_items", e))?;

        let Some((id, order_tenant)) = order else {
            return Ok(None);
        };

        let items: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT sku_id, quantity, sku_label FROM order_items \
             WHERE tenant_id = $1 AND order_id = $2 \
             ORDER BY sku_id ASC",
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_with_items", e))?;

        Ok(Some(Order {
            id: OrderId::from_uuid(id),
            tenant_id: TenantId::from_uuid(order_tenant),
            items: items.into_iter().map(Into::into).collect(),
        }))
    }
}

/// Disambiguate a zero-row one-way transition: a missing reservation is
/// `NotFound`, an already-terminal one is `AlreadyReleased`.
async fn reservation_terminal_failure(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: TenantId,
    reservation_id: ReservationId,
) -> Result<DomainError, StoreError> {
    let existing: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
        "SELECT released_at FROM reservations WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id.as_uuid())
    .bind(reservation_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("reservation_terminal_failure", e))?;

    Ok(match existing {
        None => DomainError::NotFound,
        Some(_) => DomainError::AlreadyReleased,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Unique violation: a concurrent writer inserted first.
                Some("23505") => StoreError::conflict(msg),
                // Check constraint violation: a guarded invariant lost a race.
                Some("23514") => StoreError::conflict(msg),
                // Serialization failure under SERIALIZABLE isolation.
                Some("40001") => StoreError::conflict(msg),
                _ => StoreError::storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            StoreError::storage(format!("unexpected row not found in {operation}"))
        }
        _ => StoreError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug, FromRow)]
struct LevelRow {
    id: Uuid,
    tenant_id: Uuid,
    sku_id: Uuid,
    warehouse_id: Uuid,
    available: i64,
    reserved: i64,
    damaged: Option<i64>,
}

impl From<LevelRow> for InventoryLevel {
    fn from(row: LevelRow) -> Self {
        Self {
            id: LevelId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            sku_id: SkuId::from_uuid(row.sku_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            available: row.available,
            reserved: row.reserved,
            damaged: row.damaged,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    id: Uuid,
    tenant_id: Uuid,
    order_id: Uuid,
    sku_id: Uuid,
    warehouse_id: Uuid,
    quantity_reserved: i64,
    released_at: Option<DateTime<Utc>>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Self {
            id: ReservationId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            order_id: OrderId::from_uuid(row.order_id),
            sku_id: SkuId::from_uuid(row.sku_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            quantity_reserved: row.quantity_reserved,
            released_at: row.released_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AdjustmentRow {
    id: Uuid,
    tenant_id: Uuid,
    sku_id: Uuid,
    warehouse_id: Uuid,
    quantity_delta: i64,
    reason: String,
    reference: Option<String>,
    actor: Uuid,
    occurred_at: DateTime<Utc>,
}

impl From<AdjustmentRow> for Adjustment {
    fn from(row: AdjustmentRow) -> Self {
        Self {
            id: AdjustmentId::from_uuid(row.id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            sku_id: SkuId::from_uuid(row.sku_id),
            warehouse_id: WarehouseId::from_uuid(row.warehouse_id),
            quantity_delta: row.quantity_delta,
            reason: row.reason,
            reference: row.reference,
            actor: ActorId::from_uuid(row.actor),
            occurred_at: row.occurred_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    sku_id: Uuid,
    quantity: i64,
    sku_label: String,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            sku_id: SkuId::from_uuid(row.sku_id),
            quantity: row.quantity,
            sku_label: row.sku_label,
        }
    }
}
