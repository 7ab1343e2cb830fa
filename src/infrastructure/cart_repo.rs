use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::cart::{combined_quantity, CartItem, CartScope};
use crate::domain::errors::DomainError;
use crate::domain::ports::CartRepository;
use crate::schema::cart_items;

use super::models::CartItemRow;

pub struct DieselCartRepository {
    pool: DbPool,
}

impl DieselCartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// `INSERT ... ON CONFLICT (scope, product) DO UPDATE SET quantity = quantity + excluded.quantity`
///
/// Must run inside a transaction: the held row is locked while the sum is checked.
fn upsert(
    conn: &mut PgConnection,
    scope: &CartScope,
    product_id: Uuid,
    quantity: i32,
) -> Result<CartItemRow, DomainError> {
    let held: Option<i32> = cart_items::table
        .filter(cart_items::scope_kind.eq(scope.kind()))
        .filter(cart_items::scope_id.eq(scope.key()))
        .filter(cart_items::product_id.eq(product_id))
        .select(cart_items::quantity)
        .for_update()
        .first(conn)
        .optional()?;
    if let Some(held) = held {
        combined_quantity(product_id, held, quantity)?;
    }

    let now = Utc::now();
    let row = CartItemRow {
        id: Uuid::new_v4(),
        scope_kind: scope.kind().to_string(),
        scope_id: scope.key(),
        product_id,
        quantity,
        created_at: now,
        updated_at: now,
    };
    Ok(diesel::insert_into(cart_items::table)
        .values(&row)
        .on_conflict((
            cart_items::scope_kind,
            cart_items::scope_id,
            cart_items::product_id,
        ))
        .do_update()
        .set((
            cart_items::quantity.eq(cart_items::quantity + excluded(cart_items::quantity)),
            cart_items::updated_at.eq(now),
        ))
        .returning(CartItemRow::as_returning())
        .get_result(conn)?)
}

impl CartRepository for DieselCartRepository {
    fn list(&self, scope: &CartScope) -> Result<Vec<CartItem>, DomainError> {
        let mut conn = self.pool.get()?;
        cart_items::table
            .filter(cart_items::scope_kind.eq(scope.kind()))
            .filter(cart_items::scope_id.eq(scope.key()))
            .order(cart_items::created_at.asc())
            .select(CartItemRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(CartItem::try_from)
            .collect()
    }

    fn find(&self, id: Uuid) -> Result<Option<CartItem>, DomainError> {
        let mut conn = self.pool.get()?;
        cart_items::table
            .find(id)
            .select(CartItemRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(CartItem::try_from)
            .transpose()
    }

    fn upsert_increment(
        &self,
        scope: &CartScope,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| upsert(conn, scope, product_id, quantity))?
            .try_into()
    }

    fn set_quantity(&self, id: Uuid, quantity: i32) -> Result<Option<CartItem>, DomainError> {
        let mut conn = self.pool.get()?;
        diesel::update(cart_items::table.find(id))
            .set((
                cart_items::quantity.eq(quantity),
                cart_items::updated_at.eq(Utc::now()),
            ))
            .returning(CartItemRow::as_returning())
            .get_result(&mut conn)
            .optional()?
            .map(CartItem::try_from)
            .transpose()
    }

    fn delete(&self, id: Uuid) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        let deleted = diesel::delete(cart_items::table.find(id)).execute(&mut conn)?;
        Ok(deleted > 0)
    }

    fn clear(&self, scope: &CartScope) -> Result<usize, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(diesel::delete(
            cart_items::table
                .filter(cart_items::scope_kind.eq(scope.kind()))
                .filter(cart_items::scope_id.eq(scope.key())),
        )
        .execute(&mut conn)?)
    }

    fn transfer(&self, item: &CartItem, into: &CartScope) -> Result<bool, DomainError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, DomainError, _>(|conn| {
            // the delete decides: a row already moved by an earlier run is skipped
            let removed: Option<CartItemRow> = diesel::delete(cart_items::table.find(item.id))
                .returning(CartItemRow::as_returning())
                .get_result(conn)
                .optional()?;
            let Some(removed) = removed else {
                return Ok(false);
            };
            upsert(conn, into, removed.product_id, removed.quantity)?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::DieselCartRepository;
    use crate::domain::cart::CartScope;
    use crate::domain::errors::DomainError;
    use crate::domain::ports::CartRepository;
    use crate::infrastructure::test_db::setup_db;

    #[tokio::test]
    #[ignore = "needs a container runtime"]
    async fn upsert_sums_into_one_row() {
        let (_container, pool) = setup_db().await;
        let repo = DieselCartRepository::new(pool);
        let scope = CartScope::Session("guest".into());
        let product = Uuid::new_v4();

        let first = repo.upsert_increment(&scope, product, 1).unwrap();
        let second = repo.upsert_increment(&scope, product, 2).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, 3);
        assert_eq!(repo.list(&scope).unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "needs a container runtime"]
    async fn upsert_rejects_a_sum_past_the_column_range() {
        let (_container, pool) = setup_db().await;
        let repo = DieselCartRepository::new(pool);
        let scope = CartScope::Session("guest".into());
        let product = Uuid::new_v4();

        repo.upsert_increment(&scope, product, i32::MAX).unwrap();
        assert!(matches!(
            repo.upsert_increment(&scope, product, 1),
            Err(DomainError::InvalidArgument(_))
        ));
        assert_eq!(repo.list(&scope).unwrap()[0].quantity, i32::MAX);
    }

    #[tokio::test]
    #[ignore = "needs a container runtime"]
    async fn transfer_moves_quantity_once() {
        let (_container, pool) = setup_db().await;
        let repo = DieselCartRepository::new(pool);
        let guest = CartScope::Session("guest".into());
        let user = CartScope::User(Uuid::new_v4());
        let product = Uuid::new_v4();

        repo.upsert_increment(&user, product, 1).unwrap();
        let guest_row = repo.upsert_increment(&guest, product, 2).unwrap();

        assert!(repo.transfer(&guest_row, &user).unwrap());
        // a rerun after a crash finds nothing to move
        assert!(!repo.transfer(&guest_row, &user).unwrap());

        let rows = repo.list(&user).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 3);
        assert!(repo.list(&guest).unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "needs a container runtime"]
    async fn clear_and_delete_report_what_they_removed() {
        let (_container, pool) = setup_db().await;
        let repo = DieselCartRepository::new(pool);
        let scope = CartScope::User(Uuid::new_v4());

        let a = repo.upsert_increment(&scope, Uuid::new_v4(), 1).unwrap();
        repo.upsert_increment(&scope, Uuid::new_v4(), 1).unwrap();

        assert!(repo.delete(a.id).unwrap());
        assert!(!repo.delete(a.id).unwrap());
        assert_eq!(repo.clear(&scope).unwrap(), 1);
        assert!(repo.set_quantity(a.id, 5).unwrap().is_none());
    }
}
