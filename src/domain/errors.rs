use bigdecimal::BigDecimal;
use thiserror::Error;

/// Why a coupon code cannot be applied to an order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Invalid coupon code")]
    NotFound,
    #[error("Coupon is no longer active")]
    Inactive,
    #[error("Coupon not yet valid")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Minimum order value {minimum} required")]
    BelowMinimum { minimum: BigDecimal },
    #[error("Coupon usage limit reached")]
    UsageLimitReached,
    #[error("Coupon already used")]
    AlreadyUsed,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Invalid payment event signature")]
    InvalidSignature,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Coupon(#[from] CouponRejection),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        DomainError::NotFound(what.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Unavailable(_))
    }
}
