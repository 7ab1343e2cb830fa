use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DomainError;

/// Partition key for cart rows: a guest session or a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartScope {
    Session(String),
    User(Uuid),
}

impl CartScope {
    pub const SESSION: &'static str = "session";
    pub const USER: &'static str = "user";

    pub fn kind(&self) -> &'static str {
        match self {
            CartScope::Session(_) => Self::SESSION,
            CartScope::User(_) => Self::USER,
        }
    }

    pub fn key(&self) -> String {
        match self {
            CartScope::Session(id) => id.clone(),
            CartScope::User(id) => id.to_string(),
        }
    }

    pub fn from_parts(kind: &str, key: &str) -> Option<Self> {
        match kind {
            Self::SESSION => Some(CartScope::Session(key.to_string())),
            Self::USER => Uuid::parse_str(key).ok().map(CartScope::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub id: Uuid,
    pub scope: CartScope,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sum of two quantities of the same product, rejected when it leaves `i32`.
pub fn combined_quantity(product_id: Uuid, held: i32, added: i32) -> Result<i32, DomainError> {
    held.checked_add(added).ok_or_else(|| {
        DomainError::InvalidArgument(format!("quantity for product {product_id} is too large"))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: BigDecimal,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub line_total: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub total: BigDecimal,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCheck {
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub requested_quantity: i32,
    pub available_stock: Option<i32>,
    pub valid: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartValidation {
    pub valid: bool,
    pub items: Vec<StockCheck>,
    pub message: String,
}
