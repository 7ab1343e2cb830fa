pub mod auth;
pub mod cart_repo;
pub mod catalog_repo;
pub mod coupon_repo;
pub mod memory;
pub mod models;
pub mod notifier;
pub mod order_repo;
pub mod payment_repo;
pub mod stripe;

use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::domain::errors::DomainError;

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<DieselError> for DomainError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => DomainError::not_found("Record"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DomainError::Conflict(info.message().to_string())
            }
            other => {
                log::error!("database error: {other}");
                DomainError::Internal(other.to_string())
            }
        }
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        log::error!("connection pool error: {e}");
        DomainError::Internal(e.to_string())
    }
}
