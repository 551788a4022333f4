use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{ActorId, AdjustmentId, SkuId, TenantId, WarehouseId};

/// Audit record for a manual stock correction outside the order flow
/// (receiving, damage write-off, cycle-count correction).
///
/// Append-only: no update or delete operation exists anywhere in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub quantity_delta: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}
