use bigdecimal::BigDecimal;
use diesel::prelude::*;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::cart::Product;
use crate::domain::errors::DomainError;
use crate::domain::ports::{ProductCatalog, UserDirectory};
use crate::schema::{products, users};

use super::models::{NewProductRow, ProductRow};

/// Read side of the product and user tables owned by the catalog and account services.
pub struct DieselCatalog {
    pool: DbPool,
}

impl DieselCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn add_product(&self, name: &str, price: BigDecimal, stock: i32) -> Result<Uuid, DomainError> {
        let mut conn = self.pool.get()?;
        let id = Uuid::new_v4();
        diesel::insert_into(products::table)
            .values(&NewProductRow {
                id,
                name: name.to_string(),
                price,
                stock,
                image_url: None,
            })
            .execute(&mut conn)?;
        Ok(id)
    }
}

impl ProductCatalog for DieselCatalog {
    fn find(&self, id: Uuid) -> Result<Option<Product>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(products::table
            .find(id)
            .select(ProductRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Product::from))
    }
}

impl UserDirectory for DieselCatalog {
    fn email_of(&self, user_id: Uuid) -> Result<Option<String>, DomainError> {
        let mut conn = self.pool.get()?;
        Ok(users::table
            .find(user_id)
            .select(users::email)
            .first(&mut conn)
            .optional()?)
    }
}
