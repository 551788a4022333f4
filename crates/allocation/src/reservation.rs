use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{OrderId, ReservationId, SkuId, TenantId, WarehouseId};

/// A commitment of stock to a specific order.
///
/// `released_at` is one-way: once set (by release or by shipment) the
/// reservation is terminal and can never transition again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub warehouse_id: WarehouseId,
    pub quantity_reserved: i64,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}
