use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::coupon::{Coupon, CouponRedemption};
use crate::domain::errors::{CouponRejection, DomainError};
use crate::domain::ports::CouponRepository;
use crate::schema::{coupon_redemptions, coupons};

use super::models::{CouponChangeset, CouponRow, RedemptionRow};

pub struct DieselCouponRepository {
    pool: DbPool,
}

impl DieselCouponRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl CouponRepository for DieselCouponRepository {
    fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, DomainError> {
        let mut conn = self.pool.get()?;
        coupons::table
            .find(code)
            .select(CouponRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Coupon::try_from)
            .transpose()
    }

    fn list_active(&self) -> Result<Vec<Coupon>, DomainError> {
        let mut conn = self.pool.get()?;
        coupons::table
            .filter(coupons::is_active.eq(true))
            .order(coupons::code.asc())
            .select(CouponRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(Coupon::try_from)
            .collect()
    }

    fn insert(&self, coupon: &Coupon) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(coupons::table)
            .values(&CouponRow::from(coupon))
            .execute(&mut conn)?;
        Ok(())
    }

    fn update(&self, coupon: &Coupon) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let changed = diesel::update(coupons::table.find(coupon.code.as_str()))
            .set(&CouponChangeset::from(coupon))
            .execute(&mut conn)?;
        Ok(changed > 0)
    }

    fn user_redemptions(&self, code: &str, user_id: Uuid) -> Result<i64, DomainError> {
        let mut conn = self.pool.get()?;
        count_user_redemptions(&mut conn, code, user_id)
    }

    fn redeem(&self, redemption: &CouponRedemption) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            // row lock serialises concurrent redemptions of the same code
            let coupon: CouponRow = coupons::table
                .find(redemption.code.as_str())
                .select(CouponRow::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(CouponRejection::NotFound)?;
            if coupon
                .usage_limit
                .is_some_and(|limit| coupon.usage_count >= limit)
            {
                return Err(CouponRejection::UsageLimitReached.into());
            }
            if let Some(user_id) = redemption.user_id {
                let used = count_user_redemptions(conn, &coupon.code, user_id)?;
                if used >= i64::from(coupon.per_user_limit) {
                    return Err(CouponRejection::AlreadyUsed.into());
                }
            }

            diesel::update(coupons::table.find(redemption.code.as_str()))
                .set(coupons::usage_count.eq(coupons::usage_count + 1))
                .execute(conn)?;
            diesel::insert_into(coupon_redemptions::table)
                .values(&RedemptionRow::from(redemption))
                .execute(conn)?;
            Ok(())
        })
    }

    fn release(&self, order_id: Uuid) -> Result<usize, DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            let codes: Vec<String> = diesel::delete(
                coupon_redemptions::table.filter(coupon_redemptions::order_id.eq(order_id)),
            )
            .returning(coupon_redemptions::code)
            .get_results(conn)?;
            for code in &codes {
                diesel::update(
                    coupons::table
                        .find(code.as_str())
                        .filter(coupons::usage_count.gt(0)),
                )
                .set(coupons::usage_count.eq(coupons::usage_count - 1))
                .execute(conn)?;
            }
            Ok(codes.len())
        })
    }
}

fn count_user_redemptions(
    conn: &mut PgConnection,
    code: &str,
    user_id: Uuid,
) -> Result<i64, DomainError> {
    Ok(coupon_redemptions::table
        .filter(coupon_redemptions::code.eq(code))
        .filter(coupon_redemptions::user_id.eq(user_id))
        .count()
        .get_result(conn)?)
}
