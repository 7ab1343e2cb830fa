use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};

use super::errors::DomainError;

/// Round to cents, half away from zero.
pub fn round_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

/// Amount in minor currency units (paise, cents) as expected by the processor.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, DomainError> {
    if amount < &BigDecimal::zero() {
        return Err(DomainError::InvalidArgument(format!(
            "amount must not be negative, got {amount}"
        )));
    }
    (amount * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| DomainError::InvalidArgument(format!("amount {amount} is out of range")))
}
