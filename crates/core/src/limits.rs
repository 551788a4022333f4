//! Shared quantity limits.

/// Upper bound for `available` and `reserved` on any inventory level.
///
/// Blocks arithmetic overflow and abusive imports; any calculation that would
/// push a quantity past this ceiling is rejected.
pub const MAX_INVENTORY_QUANTITY: i64 = 1_000_000;

/// Maximum length (in characters) of an adjustment's audit reason.
pub const MAX_ADJUSTMENT_REASON_CHARS: usize = 500;
