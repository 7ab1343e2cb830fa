use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::payment::{PaymentTransaction, Refund, TransactionStatus};
use crate::domain::ports::PaymentRepository;
use crate::schema::{payment_transactions, refunds};

use super::models::{RefundRow, TransactionRow};

const UNSETTLED: [TransactionStatus; 2] = [TransactionStatus::Initiated, TransactionStatus::Pending];

pub struct DieselPaymentRepository {
    pool: DbPool,
}

impl DieselPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PaymentRepository for DieselPaymentRepository {
    fn insert_transaction(&self, tx: &PaymentTransaction) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(payment_transactions::table)
            .values(&TransactionRow::from(tx))
            .execute(&mut conn)?;
        Ok(())
    }

    fn find_transaction(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DomainError> {
        let mut conn = self.pool.get()?;
        payment_transactions::table
            .find(id)
            .select(TransactionRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(PaymentTransaction::try_from)
            .transpose()
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentTransaction>, DomainError> {
        let mut conn = self.pool.get()?;
        payment_transactions::table
            .filter(payment_transactions::checkout_session_id.eq(session_id))
            .order(payment_transactions::created_at.asc())
            .select(TransactionRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(PaymentTransaction::try_from)
            .transpose()
    }

    fn settle_session(
        &self,
        session_id: &str,
        status: TransactionStatus,
    ) -> Result<usize, DomainError> {
        let mut conn = self.pool.get()?;
        let unsettled: Vec<String> = UNSETTLED.iter().map(|s| s.to_string()).collect();
        let changed = diesel::update(
            payment_transactions::table
                .filter(payment_transactions::checkout_session_id.eq(session_id))
                .filter(payment_transactions::status.eq_any(unsettled)),
        )
        .set((
            payment_transactions::status.eq(status.to_string()),
            payment_transactions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;
        Ok(changed)
    }

    fn insert_refund(&self, refund: &Refund) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(refunds::table)
            .values(&RefundRow::from(refund))
            .execute(&mut conn)?;
        Ok(())
    }

    fn find_refund(&self, id: Uuid) -> Result<Option<Refund>, DomainError> {
        let mut conn = self.pool.get()?;
        refunds::table
            .find(id)
            .select(RefundRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Refund::try_from)
            .transpose()
    }

    fn find_refund_for_order(&self, order_id: Uuid) -> Result<Option<Refund>, DomainError> {
        let mut conn = self.pool.get()?;
        refunds::table
            .filter(refunds::order_id.eq(order_id))
            .select(RefundRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Refund::try_from)
            .transpose()
    }

    fn update_refund(&self, refund: &Refund) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        let updated = diesel::update(refunds::table.find(refund.id))
            .set(&RefundRow::from(refund))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(DomainError::not_found("Refund"));
        }
        Ok(())
    }
}
