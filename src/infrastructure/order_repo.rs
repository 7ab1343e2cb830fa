use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::export::CreatedWindow;
use crate::domain::order::{ListResult, Order, OrderStatus, OrderVersion};
use crate::domain::ports::OrderRepository;
use crate::schema::orders;

use super::models::OrderRow;

pub struct DieselOrderRepository {
    pool: DbPool,
}

impl DieselOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>, DomainError> {
    rows.into_iter().map(Order::try_from).collect()
}

impl OrderRepository for DieselOrderRepository {
    fn insert(&self, order: &Order) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;
        diesel::insert_into(orders::table)
            .values(&OrderRow::try_from(order)?)
            .execute(&mut conn)?;
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DomainError> {
        let mut conn = self.pool.get()?;
        orders::table
            .find(id)
            .select(OrderRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, DomainError> {
        let mut conn = self.pool.get()?;
        orders::table
            .filter(orders::payment_session_id.eq(session_id))
            .select(OrderRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DomainError> {
        let mut conn = self.pool.get()?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .select(OrderRow::as_select())
            .order(orders::created_at.desc())
            .load(&mut conn)?;
        into_orders(rows)
    }

    fn list(
        &self,
        status: Option<OrderStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, DomainError> {
        let mut conn = self.pool.get()?;

        let offset = (page - 1) * limit;
        conn.transaction::<_, DomainError, _>(|conn| {
            let mut count = orders::table.count().into_boxed();
            let mut query = orders::table
                .select(OrderRow::as_select())
                .order(orders::created_at.desc())
                .limit(limit)
                .offset(offset)
                .into_boxed();
            if let Some(status) = status {
                count = count.filter(orders::status.eq(status.to_string()));
                query = query.filter(orders::status.eq(status.to_string()));
            }

            let total: i64 = count.get_result(conn)?;
            let rows = query.load(conn)?;
            Ok(ListResult {
                items: into_orders(rows)?,
                total,
            })
        })
    }

    fn list_created(&self, window: CreatedWindow) -> Result<Vec<Order>, DomainError> {
        let mut conn = self.pool.get()?;
        let mut query = orders::table
            .select(OrderRow::as_select())
            .order(orders::created_at.desc())
            .into_boxed();
        if let Some(from) = window.from {
            query = query.filter(orders::created_at.ge(from));
        }
        if let Some(until) = window.until {
            query = query.filter(orders::created_at.le(until));
        }
        into_orders(query.load(&mut conn)?)
    }

    fn replace(&self, order: &Order, expected: OrderVersion) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let row = OrderRow::try_from(order)?;
        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(order.id))
                .filter(orders::status.eq(expected.status.to_string()))
                .filter(orders::payment_status.eq(expected.payment_status.to_string())),
        )
        .set(&row)
        .execute(&mut conn)?;
        Ok(updated == 1)
    }
}
