use std::sync::Arc;

use bigdecimal::{BigDecimal, Zero};
use uuid::Uuid;

use crate::domain::cart::{CartItem, CartLine, CartScope, CartValidation, CartView, StockCheck};
use crate::domain::errors::DomainError;
use crate::domain::money::round_money;
use crate::domain::ports::{CartRepository, ProductCatalog};

pub struct CartService {
    carts: Arc<dyn CartRepository>,
    catalog: Arc<dyn ProductCatalog>,
}

impl CartService {
    pub fn new(carts: Arc<dyn CartRepository>, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { carts, catalog }
    }

    /// Cart contents joined with current catalog data. Rows whose product has
    /// been removed from the catalog are skipped.
    pub fn get_cart(&self, scope: &CartScope) -> Result<CartView, DomainError> {
        let mut lines = Vec::new();
        for item in self.carts.list(scope)? {
            let Some(product) = self.catalog.find(item.product_id)? else {
                log::debug!("cart row {} points at missing product {}", item.id, item.product_id);
                continue;
            };
            let line_total = round_money(&(&product.price * BigDecimal::from(item.quantity)));
            lines.push(CartLine {
                item_id: item.id,
                product_id: product.id,
                name: product.name,
                unit_price: product.price,
                image_url: product.image_url,
                quantity: item.quantity,
                line_total,
            });
        }
        let total = round_money(
            &lines
                .iter()
                .fold(BigDecimal::zero(), |acc, l| acc + &l.line_total),
        );
        Ok(CartView {
            item_count: lines.len(),
            items: lines,
            total,
        })
    }

    /// Adds `quantity` of a product, summing with an existing row for the same product.
    /// Stock is not checked here; see [`CartService::validate`].
    pub fn add_item(
        &self,
        scope: &CartScope,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidArgument(
                "quantity must be at least 1".into(),
            ));
        }
        if self.catalog.find(product_id)?.is_none() {
            return Err(DomainError::not_found("Product"));
        }
        let item = self.carts.upsert_increment(scope, product_id, quantity)?;
        log::debug!(
            "cart {}:{} now holds {} of {}",
            scope.kind(),
            scope.key(),
            item.quantity,
            product_id
        );
        Ok(item)
    }

    pub fn update_quantity(
        &self,
        scope: &CartScope,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidArgument(
                "quantity must be at least 1".into(),
            ));
        }
        self.owned_item(scope, item_id)?;
        self.carts
            .set_quantity(item_id, quantity)?
            .ok_or_else(|| DomainError::not_found("Cart item"))
    }

    pub fn remove_item(&self, scope: &CartScope, item_id: Uuid) -> Result<(), DomainError> {
        self.owned_item(scope, item_id)?;
        if !self.carts.delete(item_id)? {
            return Err(DomainError::not_found("Cart item"));
        }
        Ok(())
    }

    /// Items of another cart are reported as missing.
    fn owned_item(&self, scope: &CartScope, item_id: Uuid) -> Result<CartItem, DomainError> {
        self.carts
            .find(item_id)?
            .filter(|item| &item.scope == scope)
            .ok_or_else(|| DomainError::not_found("Cart item"))
    }

    pub fn clear(&self, scope: &CartScope) -> Result<usize, DomainError> {
        self.carts.clear(scope)
    }

    /// Reports stock problems in a signed-in user's cart without changing it.
    pub fn validate(&self, user_id: Uuid) -> Result<CartValidation, DomainError> {
        let items = self.carts.list(&CartScope::User(user_id))?;
        if items.is_empty() {
            return Ok(CartValidation {
                valid: false,
                items: Vec::new(),
                message: "Cart is empty".into(),
            });
        }

        let mut checks = Vec::with_capacity(items.len());
        for item in items {
            let check = match self.catalog.find(item.product_id)? {
                None => StockCheck {
                    product_id: item.product_id,
                    product_name: None,
                    requested_quantity: item.quantity,
                    available_stock: None,
                    valid: false,
                    reason: "Product not found".into(),
                },
                Some(product) => {
                    let valid = product.stock >= item.quantity;
                    StockCheck {
                        product_id: product.id,
                        product_name: Some(product.name),
                        requested_quantity: item.quantity,
                        available_stock: Some(product.stock),
                        valid,
                        reason: if valid {
                            "In stock".into()
                        } else {
                            format!("Only {} available", product.stock)
                        },
                    }
                }
            };
            checks.push(check);
        }

        let valid = checks.iter().all(|c| c.valid);
        Ok(CartValidation {
            valid,
            items: checks,
            message: if valid {
                "All items in stock".into()
            } else {
                "Some items have limited stock".into()
            },
        })
    }

    /// Moves a guest cart into the user's cart after login. Quantities for a product
    /// already in the user's cart are summed. Returns how many rows were moved.
    pub fn merge_guest_cart(&self, user_id: Uuid, guest_session: &str) -> Result<usize, DomainError> {
        let guest = CartScope::Session(guest_session.to_string());
        let target = CartScope::User(user_id);
        let mut merged = 0;
        for item in self.carts.list(&guest)? {
            if self.carts.transfer(&item, &target)? {
                merged += 1;
            }
        }
        // rows added to the guest cart while merging are dropped with the session
        self.carts.clear(&guest)?;
        log::info!("merged {merged} guest cart rows into user {user_id}");
        Ok(merged)
    }
}
