use serde::{Deserialize, Serialize};

use depot_core::{OrderId, SkuId, TenantId};

/// One requested line of a customer order.
///
/// Input to the calculator only; orders are persisted by the intake layer.
/// `sku_label` is denormalized so stock errors can name the product without a
/// second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku_id: SkuId,
    pub quantity: i64,
    pub sku_label: String,
}

/// A customer order with its line items, as read through the store contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub items: Vec<OrderItem>,
}
