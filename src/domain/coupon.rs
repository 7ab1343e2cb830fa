use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::errors::{CouponRejection, DomainError};
use super::money::round_money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
    FreeShipping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: BigDecimal,
    pub min_order_value: BigDecimal,
    pub max_discount: Option<BigDecimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub per_user_limit: i32,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Checks activity, validity window and minimum order value, in that order.
    pub fn check_applicable(
        &self,
        order_value: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if now < self.valid_from {
            return Err(CouponRejection::NotYetValid);
        }
        if now > self.valid_until {
            return Err(CouponRejection::Expired);
        }
        if order_value < &self.min_order_value {
            return Err(CouponRejection::BelowMinimum {
                minimum: self.min_order_value.clone(),
            });
        }
        if let Some(limit) = self.usage_limit {
            if self.usage_count >= limit {
                return Err(CouponRejection::UsageLimitReached);
            }
        }
        Ok(())
    }

    pub fn discount_for(&self, order_value: &BigDecimal) -> BigDecimal {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = order_value * &self.value / BigDecimal::from(100);
                match &self.max_discount {
                    Some(cap) if &pct > cap => cap.clone(),
                    _ => pct,
                }
            }
            DiscountType::Fixed => self.value.clone().min(order_value.clone()),
            DiscountType::FreeShipping => BigDecimal::zero(),
        };
        round_money(&raw.max(BigDecimal::zero()))
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && now <= self.valid_until
    }

    pub fn quote(&self, order_value: &BigDecimal) -> CouponQuote {
        let discount_amount = self.discount_for(order_value);
        let final_amount = round_money(&(order_value - &discount_amount));
        CouponQuote {
            code: self.code.clone(),
            discount_type: self.discount_type,
            discount_amount,
            final_amount,
            free_shipping: self.discount_type == DiscountType::FreeShipping,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouponQuote {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_amount: BigDecimal,
    pub final_amount: BigDecimal,
    pub free_shipping: bool,
}

#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: BigDecimal,
    pub min_order_value: BigDecimal,
    pub max_discount: Option<BigDecimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: i32,
}

impl NewCoupon {
    pub fn into_coupon(self, now: DateTime<Utc>) -> Result<Coupon, DomainError> {
        let code = Coupon::normalize_code(&self.code);
        if code.is_empty() {
            return Err(DomainError::InvalidArgument("coupon code is required".into()));
        }
        let coupon = Coupon {
            code,
            discount_type: self.discount_type,
            value: self.value,
            min_order_value: self.min_order_value,
            max_discount: self.max_discount,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            is_active: true,
            usage_limit: self.usage_limit,
            usage_count: 0,
            per_user_limit: self.per_user_limit,
            created_at: now,
        };
        coupon.check_definition()?;
        Ok(coupon)
    }
}

/// Admin edit of a coupon. Absent fields keep their value; the code and the
/// usage count are never edited.
#[derive(Debug, Clone, Default)]
pub struct CouponPatch {
    pub discount_type: Option<DiscountType>,
    pub value: Option<BigDecimal>,
    pub min_order_value: Option<BigDecimal>,
    pub max_discount: Option<BigDecimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
}

impl Coupon {
    /// The coupon with `patch` applied, held to the same rules as a new one.
    pub fn apply(&self, patch: CouponPatch) -> Result<Coupon, DomainError> {
        let mut next = self.clone();
        if let Some(discount_type) = patch.discount_type {
            next.discount_type = discount_type;
        }
        if let Some(value) = patch.value {
            next.value = value;
        }
        if let Some(min_order_value) = patch.min_order_value {
            next.min_order_value = min_order_value;
        }
        if let Some(max_discount) = patch.max_discount {
            next.max_discount = Some(max_discount);
        }
        if let Some(valid_from) = patch.valid_from {
            next.valid_from = valid_from;
        }
        if let Some(valid_until) = patch.valid_until {
            next.valid_until = valid_until;
        }
        if let Some(is_active) = patch.is_active {
            next.is_active = is_active;
        }
        if let Some(usage_limit) = patch.usage_limit {
            next.usage_limit = Some(usage_limit);
        }
        if let Some(per_user_limit) = patch.per_user_limit {
            next.per_user_limit = per_user_limit;
        }
        next.check_definition()?;
        Ok(next)
    }

    fn check_definition(&self) -> Result<(), DomainError> {
        if self.discount_type != DiscountType::FreeShipping && self.value <= BigDecimal::zero() {
            return Err(DomainError::InvalidArgument("discount value must be positive".into()));
        }
        if self.discount_type == DiscountType::Percentage && self.value > BigDecimal::from(100) {
            return Err(DomainError::InvalidArgument(
                "percentage discount cannot exceed 100".into(),
            ));
        }
        if self.valid_until <= self.valid_from {
            return Err(DomainError::InvalidArgument(
                "valid_until must be after valid_from".into(),
            ));
        }
        if self.per_user_limit < 1 || self.usage_limit.is_some_and(|l| l < 1) {
            return Err(DomainError::InvalidArgument("usage limits must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouponRedemption {
    pub id: Uuid,
    pub code: String,
    pub user_id: Option<Uuid>,
    pub order_id: Uuid,
    pub discount_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}
