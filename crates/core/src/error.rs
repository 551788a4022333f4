//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Infrastructure
/// concerns (connection loss, write conflicts) belong to the store layer.
///
/// Reservation, release, and shipment calculations fail fast with a single
/// cause. Adjustment *input* validation deliberately does not use this type for
/// per-field problems: it returns a structured outcome so callers can validate
/// a whole batch before applying any member, and only surfaces here as
/// `ValidationFailed` once a batch is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Requested quantity was zero or negative.
    #[error("quantity must be a positive integer (got {got})")]
    InvalidQuantity { got: i64 },

    /// No single inventory level can satisfy the request.
    ///
    /// `available` is the *sum* across all candidate levels, so callers can
    /// show a meaningful total rather than per-level figures.
    #[error("insufficient stock for {sku_label}: required {required}, available {available}")]
    InsufficientStock {
        sku_label: String,
        required: i64,
        available: i64,
    },

    /// The operation would push a quantity past the configured ceiling.
    #[error("inventory quantity cannot exceed {limit}")]
    CapacityExceeded { limit: i64 },

    /// The reservation is terminal; releasing is one-way and never idempotent.
    #[error("reservation has already been released")]
    AlreadyReleased,

    /// A requested resource was not found.
    ///
    /// Cross-tenant access reports this same kind; existence must never leak
    /// across tenants.
    #[error("not found")]
    NotFound,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A batch of field-level validation messages (adjustment input).
    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
}

impl DomainError {
    pub fn invalid_quantity(got: i64) -> Self {
        Self::InvalidQuantity { got }
    }

    pub fn insufficient_stock(sku_label: impl Into<String>, required: i64, available: i64) -> Self {
        Self::InsufficientStock {
            sku_label: sku_label.into(),
            required,
            available,
        }
    }

    pub fn capacity_exceeded(limit: i64) -> Self {
        Self::CapacityExceeded { limit }
    }

    pub fn already_released() -> Self {
        Self::AlreadyReleased
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed(errors)
    }
}
