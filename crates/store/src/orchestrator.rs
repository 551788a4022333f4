//! Reservation orchestration (application-level sequencing).
//!
//! The orchestrator sequences pure calculator calls against store reads and
//! writes. Per order it runs:
//!
//! ```text
//! Order id
//!   ↓
//! 1. Load the order and its items (tenant-scoped)
//!   ↓
//! 2. Calculate reservations (items sorted by SKU, first-fit per item)
//!   ↓
//! 3. Commit atomically (all level deltas + reservation rows, or nothing)
//!   ↓
//! 4. On a storage conflict: retry the whole sequence with fresh reads
//! ```
//!
//! The calculator never suspends and the store never decides; this module is
//! the only place the two meet. It composes any [`InventoryStore`], so the
//! same code paths run against the in-memory store in tests and Postgres in
//! production.
//!
//! "No oversell" is a joint property of the sorted calculation order and the
//! store's guarded, transactional commits; neither half guarantees it alone,
//! which is why the tests for it live at this level and not in the calculator.

use chrono::Utc;
use tracing::{instrument, warn};

use depot_allocation::{
    calculate_adjustment, calculate_release, calculate_reservations_for_order,
    calculate_shipment, validate_adjustment_input, Adjustment, InventoryLevel, Reservation,
};
use depot_core::{ActorId, DomainError, OrderId, SkuId, TenantId, WarehouseId};

use crate::contract::{InventoryStore, NewAdjustment, StoreError};

/// One manual stock correction in a batch (receiving, damage, cycle count).
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub quantity_delta: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub actor: ActorId,
}

/// Sequences calculator + store for order reservation, release, shipment, and
/// manual adjustments.
///
/// Generic over the store so tests compose the in-memory realization and
/// production composes Postgres, selected at construction (no runtime
/// reflection).
#[derive(Debug)]
pub struct ReservationOrchestrator<S> {
    store: S,
    max_attempts: u32,
}

impl<S> ReservationOrchestrator<S> {
    /// Default retry budget for conflicted per-order commits.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the retry budget (at least 1 attempt).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> ReservationOrchestrator<S>
where
    S: InventoryStore,
{
    /// Reserve stock for every item of an order, all-or-nothing.
    ///
    /// Items are processed in SKU order (deadlock avoidance); each item gets
    /// the first level with enough `available` (first-fit). A conflicted
    /// commit (a concurrent writer invalidated our reads) is retried with
    /// freshly read levels, up to the configured budget. Calculation failures
    /// (`InsufficientStock`, `InvalidQuantity`, `CapacityExceeded`) are final
    /// and abort without a retry.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id.as_uuid()),
        err
    )]
    pub async fn reserve_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let order = self
            .store
            .order_with_items(tenant_id, order_id)
            .await?
            .ok_or_else(StoreError::not_found)?;

        let mut attempt = 1;
        loop {
            let calculations = calculate_reservations_for_order(&order.items, |sku_id| {
                self.store.levels_for_sku(tenant_id, sku_id)
            })
            .await?;

            match self
                .store
                .commit_order_reservations(tenant_id, order_id, &calculations)
                .await
            {
                Ok(reservations) => return Ok(reservations),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, %err, "order reservation conflicted; retrying with fresh reads");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Release every open reservation of an order (e.g. cancellation),
    /// returning the stock to `available`.
    ///
    /// Reservations that are already terminal are skipped: they were
    /// released or shipped through their own transition. The per-reservation
    /// one-way guard stays strict in the calculator and the store.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id.as_uuid()),
        err
    )]
    pub async fn release_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut released = Vec::new();
        for reservation in self.open_reservations(tenant_id, order_id).await? {
            let level = self
                .level_for(tenant_id, &reservation)
                .await?;
            let release = calculate_release(&reservation, &level)?;
            released.push(
                self.store
                    .release_reservation(tenant_id, reservation.id, &release, Utc::now())
                    .await?,
            );
        }
        Ok(released)
    }

    /// Ship every open reservation of an order: the committed stock leaves
    /// `reserved` permanently (deduct-on-ship), never returning to
    /// `available`.
    #[instrument(
        skip(self),
        fields(tenant_id = %tenant_id.as_uuid(), order_id = %order_id.as_uuid()),
        err
    )]
    pub async fn ship_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut shipped = Vec::new();
        for reservation in self.open_reservations(tenant_id, order_id).await? {
            let level = self
                .level_for(tenant_id, &reservation)
                .await?;
            let shipment = calculate_shipment(&reservation, &level)?;
            shipped.push(
                self.store
                    .consume_reservation(tenant_id, reservation.id, &shipment, Utc::now())
                    .await?,
            );
        }
        Ok(shipped)
    }

    /// Apply a batch of manual adjustments, validating the whole batch first.
    ///
    /// Phase one runs input validation and the adjustment calculation for
    /// every request, collecting violations (prefixed with the request index).
    /// If anything is invalid the entire batch is rejected with
    /// `ValidationFailed` and nothing is written. Phase two applies each
    /// adjustment through the store's atomic level-update-plus-audit-append.
    #[instrument(
        skip(self, requests),
        fields(tenant_id = %tenant_id.as_uuid(), request_count = requests.len()),
        err
    )]
    pub async fn apply_adjustments(
        &self,
        tenant_id: TenantId,
        requests: Vec<AdjustmentRequest>,
    ) -> Result<Vec<Adjustment>, StoreError> {
        let mut errors = Vec::new();
        let mut validated = Vec::with_capacity(requests.len());

        for (idx, request) in requests.iter().enumerate() {
            let input = validate_adjustment_input(request.quantity_delta, &request.reason);
            for message in &input.errors {
                errors.push(format!("adjustment {idx}: {message}"));
            }
            if !input.is_valid {
                continue;
            }

            let Some(level) = self
                .store
                .level_for_warehouse(tenant_id, request.sku_id, request.warehouse_id)
                .await?
            else {
                errors.push(format!(
                    "adjustment {idx}: no inventory level for sku {} at warehouse {}",
                    request.sku_id, request.warehouse_id
                ));
                continue;
            };

            let calculation = calculate_adjustment(&level, request.quantity_delta);
            if calculation.is_valid {
                validated.push((level, calculation));
            } else if let Some(message) = &calculation.error_message {
                errors.push(format!("adjustment {idx}: {message}"));
            }
        }

        if !errors.is_empty() {
            return Err(DomainError::validation_failed(errors).into());
        }

        let mut applied = Vec::with_capacity(requests.len());
        for (request, (level, calculation)) in requests.iter().zip(validated) {
            applied.push(
                self.store
                    .record_adjustment(
                        tenant_id,
                        level.id,
                        calculation.new_available,
                        NewAdjustment {
                            tenant_id,
                            sku_id: request.sku_id,
                            warehouse_id: request.warehouse_id,
                            quantity_delta: request.quantity_delta,
                            reason: request.reason.clone(),
                            reference: request.reference.clone(),
                            actor: request.actor,
                            occurred_at: Utc::now(),
                        },
                    )
                    .await?,
            );
        }

        Ok(applied)
    }

    async fn open_reservations(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .store
            .reservations_for_order(tenant_id, order_id)
            .await?
            .into_iter()
            .filter(|r| !r.is_released())
            .collect())
    }

    async fn level_for(
        &self,
        tenant_id: TenantId,
        reservation: &Reservation,
    ) -> Result<InventoryLevel, StoreError> {
        self.store
            .level_for_warehouse(tenant_id, reservation.sku_id, reservation.warehouse_id)
            .await?
            .ok_or_else(StoreError::not_found)
    }
}
