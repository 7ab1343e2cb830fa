use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::coupon::{Coupon, CouponPatch, CouponQuote, CouponRedemption, NewCoupon};
use crate::domain::errors::{CouponRejection, DomainError};
use crate::domain::ports::CouponRepository;

pub struct CouponService {
    repo: Arc<dyn CouponRepository>,
}

impl CouponService {
    pub fn new(repo: Arc<dyn CouponRepository>) -> Self {
        Self { repo }
    }

    /// Prices `order_value` with `code` without consuming the coupon.
    pub fn validate(
        &self,
        code: &str,
        order_value: &BigDecimal,
        user_id: Option<Uuid>,
    ) -> Result<CouponQuote, DomainError> {
        self.validate_at(code, order_value, user_id, Utc::now())
    }

    pub fn validate_at(
        &self,
        code: &str,
        order_value: &BigDecimal,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, DomainError> {
        let coupon = self
            .repo
            .find_by_code(&Coupon::normalize_code(code))?
            .ok_or(CouponRejection::NotFound)?;

        coupon.check_applicable(order_value, now)?;

        if let Some(user_id) = user_id {
            let used = self.repo.user_redemptions(&coupon.code, user_id)?;
            if used >= i64::from(coupon.per_user_limit) {
                return Err(CouponRejection::AlreadyUsed.into());
            }
        }

        Ok(coupon.quote(order_value))
    }

    /// Consumes one use of the quoted coupon for `order_id`.
    pub fn redeem(
        &self,
        quote: &CouponQuote,
        user_id: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<(), DomainError> {
        let redemption = CouponRedemption {
            id: Uuid::new_v4(),
            code: quote.code.clone(),
            user_id,
            order_id,
            discount_amount: quote.discount_amount.clone(),
            created_at: Utc::now(),
        };
        self.repo.redeem(&redemption)?;
        log::info!("coupon {} redeemed for order {}", quote.code, order_id);
        Ok(())
    }

    /// Gives back the coupon use held by an order that will never be paid.
    pub fn release_for_order(&self, order_id: Uuid) -> Result<(), DomainError> {
        let released = self.repo.release(order_id)?;
        if released > 0 {
            log::info!("released {released} coupon redemption(s) of order {order_id}");
        }
        Ok(())
    }

    pub fn list_active(&self) -> Result<Vec<Coupon>, DomainError> {
        let now = Utc::now();
        Ok(self
            .repo
            .list_active()?
            .into_iter()
            .filter(|c| c.is_live(now))
            .collect())
    }

    pub fn create(&self, input: NewCoupon) -> Result<Coupon, DomainError> {
        let coupon = input.into_coupon(Utc::now())?;
        if self.repo.find_by_code(&coupon.code)?.is_some() {
            return Err(DomainError::Conflict(format!(
                "coupon {} already exists",
                coupon.code
            )));
        }
        self.repo.insert(&coupon)?;
        log::info!("coupon {} created", coupon.code);
        Ok(coupon)
    }

    /// Admin lookup; unlike [`CouponService::validate`] an unknown code is a 404.
    pub fn get(&self, code: &str) -> Result<Coupon, DomainError> {
        let code = Coupon::normalize_code(code);
        self.repo
            .find_by_code(&code)?
            .ok_or_else(|| DomainError::not_found(format!("Coupon {code}")))
    }

    pub fn update(&self, code: &str, patch: CouponPatch) -> Result<Coupon, DomainError> {
        let updated = self.get(code)?.apply(patch)?;
        if !self.repo.update(&updated)? {
            return Err(DomainError::not_found(format!("Coupon {}", updated.code)));
        }
        log::info!("coupon {} updated", updated.code);
        // re-read so the usage count reflects redemptions made meanwhile
        self.get(&updated.code)
    }

    /// Retires a code. Redemptions already recorded stay in place.
    pub fn deactivate(&self, code: &str) -> Result<Coupon, DomainError> {
        let coupon = self.update(
            code,
            CouponPatch {
                is_active: Some(false),
                ..CouponPatch::default()
            },
        )?;
        log::info!("coupon {} deactivated", coupon.code);
        Ok(coupon)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Duration;

    use super::*;
    use crate::domain::coupon::DiscountType;
    use crate::infrastructure::memory::InMemoryStore;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn service_with(input: NewCoupon) -> CouponService {
        let store = Arc::new(InMemoryStore::default());
        let service = CouponService::new(store);
        service.create(input).unwrap();
        service
    }

    fn save10() -> NewCoupon {
        let now = Utc::now();
        NewCoupon {
            code: "SAVE10".into(),
            discount_type: DiscountType::Percentage,
            value: dec("10"),
            min_order_value: dec("500"),
            max_discount: None,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            usage_limit: None,
            per_user_limit: 1,
        }
    }

    #[test]
    fn save10_on_1000_gives_100_off() {
        let service = service_with(save10());
        let quote = service.validate("SAVE10", &dec("1000"), None).unwrap();
        assert_eq!(quote.discount_amount, dec("100.00"));
        assert_eq!(quote.final_amount, dec("900.00"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let service = service_with(save10());
        assert!(service.validate("save10", &dec("1000"), None).is_ok());
    }

    #[test]
    fn save10_on_400_is_below_minimum() {
        let service = service_with(save10());
        let err = service.validate("SAVE10", &dec("400"), None).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Coupon(CouponRejection::BelowMinimum { .. })
        ));
    }

    #[test]
    fn unknown_code_is_not_found() {
        let service = service_with(save10());
        let err = service.validate("NOPE", &dec("1000"), None).unwrap_err();
        assert!(matches!(err, DomainError::Coupon(CouponRejection::NotFound)));
    }

    #[test]
    fn per_user_limit_blocks_second_use() {
        let service = service_with(save10());
        let user = Uuid::new_v4();
        let quote = service.validate("SAVE10", &dec("1000"), Some(user)).unwrap();
        service.redeem(&quote, Some(user), Uuid::new_v4()).unwrap();

        let err = service
            .validate("SAVE10", &dec("1000"), Some(user))
            .unwrap_err();
        assert!(matches!(err, DomainError::Coupon(CouponRejection::AlreadyUsed)));
        // another shopper is unaffected
        assert!(service
            .validate("SAVE10", &dec("1000"), Some(Uuid::new_v4()))
            .is_ok());
    }

    #[test]
    fn per_user_limit_is_enforced_at_redemption_too() {
        let service = service_with(save10());
        let user = Uuid::new_v4();
        // two checkouts priced before either one redeemed
        let first = service.validate("SAVE10", &dec("1000"), Some(user)).unwrap();
        let second = service.validate("SAVE10", &dec("1000"), Some(user)).unwrap();

        service.redeem(&first, Some(user), Uuid::new_v4()).unwrap();
        let err = service.redeem(&second, Some(user), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DomainError::Coupon(CouponRejection::AlreadyUsed)));
        assert_eq!(service.get("SAVE10").unwrap().usage_count, 1);
    }

    #[test]
    fn admin_can_read_edit_and_deactivate_a_coupon() {
        let service = service_with(save10());

        assert!(matches!(service.get("NOPE"), Err(DomainError::NotFound(_))));
        assert_eq!(service.get("save10").unwrap().code, "SAVE10");

        let edited = service
            .update(
                "save10",
                CouponPatch {
                    value: Some(dec("15")),
                    ..CouponPatch::default()
                },
            )
            .unwrap();
        assert_eq!(edited.value, dec("15"));
        let quote = service.validate("SAVE10", &dec("1000"), None).unwrap();
        assert_eq!(quote.discount_amount, dec("150.00"));

        assert!(matches!(
            service.update(
                "SAVE10",
                CouponPatch {
                    value: Some(dec("150")),
                    ..CouponPatch::default()
                }
            ),
            Err(DomainError::InvalidArgument(_))
        ));

        let retired = service.deactivate("SAVE10").unwrap();
        assert!(!retired.is_active);
        let err = service.validate("SAVE10", &dec("1000"), None).unwrap_err();
        assert!(matches!(err, DomainError::Coupon(CouponRejection::Inactive)));
        assert!(service.list_active().unwrap().is_empty());
        assert!(matches!(service.deactivate("NOPE"), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn global_usage_limit_stops_redemption() {
        let service = service_with(NewCoupon {
            usage_limit: Some(1),
            ..save10()
        });
        let quote = service.validate("SAVE10", &dec("1000"), None).unwrap();
        service.redeem(&quote, None, Uuid::new_v4()).unwrap();

        let err = service.redeem(&quote, None, Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Coupon(CouponRejection::UsageLimitReached)
        ));
        assert!(service.validate("SAVE10", &dec("1000"), None).is_err());
    }

    #[test]
    fn duplicate_code_conflicts() {
        let service = service_with(save10());
        let err = service
            .create(NewCoupon {
                code: "save10".into(),
                ..save10()
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn list_active_skips_expired_coupons() {
        let now = Utc::now();
        let service = service_with(save10());
        service
            .create(NewCoupon {
                code: "OLD".into(),
                valid_from: now - Duration::days(10),
                valid_until: now - Duration::days(5),
                ..save10()
            })
            .unwrap();
        let codes: Vec<_> = service
            .list_active()
            .unwrap()
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["SAVE10".to_string()]);
    }
}
