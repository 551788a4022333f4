use serde::{Deserialize, Serialize};

use depot_core::{LevelId, SkuId, TenantId, WarehouseId};

/// Sellable-stock record for one (tenant, SKU, warehouse) triple.
///
/// Invariants, enforced by the calculator and re-checked by the store:
/// `available >= 0`, `reserved >= 0`, both bounded above by
/// [`depot_core::MAX_INVENTORY_QUANTITY`]. `available + reserved` is the total
/// undamaged on-hand quantity and only changes through a calculated delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub id: LevelId,
    pub tenant_id: TenantId,
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub available: i64,
    pub reserved: i64,
    pub damaged: Option<i64>,
}

impl InventoryLevel {
    /// Total undamaged on-hand quantity (`available + reserved`).
    pub fn on_hand(&self) -> i64 {
        self.available + self.reserved
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.available == 0
    }
}
