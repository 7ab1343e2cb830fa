use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::cart::{CartItem, CartScope, Product};
use crate::domain::coupon::{Coupon, CouponRedemption, DiscountType};
use crate::domain::errors::DomainError;
use crate::domain::order::{Order, OrderStatus, PaymentStatus, RefundStatus};
use crate::domain::payment::{PaymentTransaction, Refund, TransactionStatus};
use crate::schema::{
    cart_items, coupon_redemptions, coupons, orders, payment_transactions, products, refunds,
};

fn parse<T: FromStr>(column: &str, raw: &str) -> Result<T, DomainError> {
    T::from_str(raw)
        .map_err(|_| DomainError::Internal(format!("unexpected {column} value {raw:?} in store")))
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<Value, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::Internal(format!("cannot encode {column}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(column: &str, value: Value) -> Result<T, DomainError> {
    serde_json::from_value(value)
        .map_err(|e| DomainError::Internal(format!("cannot decode {column}: {e}")))
}

// ── Orders ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_session_id: Option<String>,
    pub customer_email: Option<String>,
    pub items: Value,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub shipping: BigDecimal,
    pub total: BigDecimal,
    pub coupon_code: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub payment_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipping_address: Option<Value>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub refund_status: Option<String>,
    pub refund_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub timeline: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Order> for OrderRow {
    type Error = DomainError;

    fn try_from(o: &Order) -> Result<Self, Self::Error> {
        Ok(Self {
            id: o.id,
            user_id: o.user_id,
            guest_session_id: o.guest_session_id.clone(),
            customer_email: o.customer_email.clone(),
            items: to_json("items", &o.items)?,
            subtotal: o.subtotal.clone(),
            discount: o.discount.clone(),
            shipping: o.shipping.clone(),
            total: o.total.clone(),
            coupon_code: o.coupon_code.clone(),
            status: o.status.to_string(),
            payment_status: o.payment_status.to_string(),
            payment_session_id: o.payment_session_id.clone(),
            payment_intent_id: o.payment_intent_id.clone(),
            paid_at: o.paid_at,
            shipping_address: o
                .shipping_address
                .as_ref()
                .map(|a| to_json("shipping_address", a))
                .transpose()?,
            notes: o.notes.clone(),
            tracking_number: o.tracking_number.clone(),
            refund_status: o.refund_status.map(|s| s.to_string()),
            refund_reason: o.refund_reason.clone(),
            cancelled_at: o.cancelled_at,
            timeline: to_json("timeline", &o.timeline)?,
            created_at: o.created_at,
            updated_at: o.updated_at,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = DomainError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            guest_session_id: r.guest_session_id,
            customer_email: r.customer_email,
            items: from_json("items", r.items)?,
            subtotal: r.subtotal,
            discount: r.discount,
            shipping: r.shipping,
            total: r.total,
            coupon_code: r.coupon_code,
            status: parse::<OrderStatus>("status", &r.status)?,
            payment_status: parse::<PaymentStatus>("payment_status", &r.payment_status)?,
            payment_session_id: r.payment_session_id,
            payment_intent_id: r.payment_intent_id,
            paid_at: r.paid_at,
            shipping_address: r
                .shipping_address
                .map(|v| from_json("shipping_address", v))
                .transpose()?,
            notes: r.notes,
            tracking_number: r.tracking_number,
            refund_status: r
                .refund_status
                .as_deref()
                .map(|s| parse::<RefundStatus>("refund_status", s))
                .transpose()?,
            refund_reason: r.refund_reason,
            cancelled_at: r.cancelled_at,
            timeline: from_json("timeline", r.timeline)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// ── Payments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = payment_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TransactionRow {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub checkout_session_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PaymentTransaction> for TransactionRow {
    fn from(t: &PaymentTransaction) -> Self {
        Self {
            id: t.id,
            order_id: t.order_id,
            user_id: t.user_id,
            checkout_session_id: t.checkout_session_id.clone(),
            amount: t.amount.clone(),
            currency: t.currency.clone(),
            status: t.status.to_string(),
            retry_of: t.retry_of,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = DomainError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            order_id: r.order_id,
            user_id: r.user_id,
            checkout_session_id: r.checkout_session_id,
            amount: r.amount,
            currency: r.currency,
            status: parse::<TransactionStatus>("status", &r.status)?,
            retry_of: r.retry_of,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = refunds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct RefundRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&Refund> for RefundRow {
    fn from(r: &Refund) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            user_id: r.user_id,
            amount: r.amount.clone(),
            reason: r.reason.clone(),
            status: r.status.to_string(),
            created_at: r.created_at,
            resolved_at: r.resolved_at,
        }
    }
}

impl TryFrom<RefundRow> for Refund {
    type Error = DomainError;

    fn try_from(r: RefundRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            order_id: r.order_id,
            user_id: r.user_id,
            amount: r.amount,
            reason: r.reason,
            status: parse::<RefundStatus>("status", &r.status)?,
            created_at: r.created_at,
            resolved_at: r.resolved_at,
        })
    }
}

// ── Cart & catalog ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemRow {
    pub id: Uuid,
    pub scope_kind: String,
    pub scope_id: String,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = DomainError;

    fn try_from(r: CartItemRow) -> Result<Self, Self::Error> {
        let scope = CartScope::from_parts(&r.scope_kind, &r.scope_id).ok_or_else(|| {
            DomainError::Internal(format!(
                "cart row {} has bad scope {}:{}",
                r.id, r.scope_kind, r.scope_id
            ))
        })?;
        Ok(Self {
            id: r.id,
            scope,
            product_id: r.product_id,
            quantity: r.quantity,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductRow {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub image_url: Option<String>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            price: r.price,
            stock: r.stock,
            image_url: r.image_url,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = products)]
pub struct NewProductRow {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub image_url: Option<String>,
}

// ── Coupons ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = coupons)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CouponRow {
    pub code: String,
    pub discount_type: String,
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

impl From<&Coupon> for CouponRow {
    fn from(c: &Coupon) -> Self {
        Self {
            code: c.code.clone(),
            discount_type: c.discount_type.to_string(),
            value: c.value.clone(),
            min_order_value: c.min_order_value.clone(),
            max_discount: c.max_discount.clone(),
            valid_from: c.valid_from,
            valid_until: c.valid_until,
            is_active: c.is_active,
            usage_limit: c.usage_limit,
            usage_count: c.usage_count,
            per_user_limit: c.per_user_limit,
            created_at: c.created_at,
        }
    }
}

/// Editable coupon columns. `usage_count` only moves through redemptions.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = coupons)]
#[diesel(treat_none_as_null = true)]
pub struct CouponChangeset {
    pub discount_type: String,
    pub value: BigDecimal,
    pub min_order_value: BigDecimal,
    pub max_discount: Option<BigDecimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub per_user_limit: i32,
}

impl From<&Coupon> for CouponChangeset {
    fn from(c: &Coupon) -> Self {
        Self {
            discount_type: c.discount_type.to_string(),
            value: c.value.clone(),
            min_order_value: c.min_order_value.clone(),
            max_discount: c.max_discount.clone(),
            valid_from: c.valid_from,
            valid_until: c.valid_until,
            is_active: c.is_active,
            usage_limit: c.usage_limit,
            per_user_limit: c.per_user_limit,
        }
    }
}

impl TryFrom<CouponRow> for Coupon {
    type Error = DomainError;

    fn try_from(r: CouponRow) -> Result<Self, Self::Error> {
        Ok(Self {
            discount_type: parse::<DiscountType>("discount_type", &r.discount_type)?,
            code: r.code,
            value: r.value,
            min_order_value: r.min_order_value,
            max_discount: r.max_discount,
            valid_from: r.valid_from,
            valid_until: r.valid_until,
            is_active: r.is_active,
            usage_limit: r.usage_limit,
            usage_count: r.usage_count,
            per_user_limit: r.per_user_limit,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = coupon_redemptions)]
pub struct RedemptionRow {
    pub id: Uuid,
    pub code: String,
    pub user_id: Option<Uuid>,
    pub order_id: Uuid,
    pub discount_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

impl From<&CouponRedemption> for RedemptionRow {
    fn from(r: &CouponRedemption) -> Self {
        Self {
            id: r.id,
            code: r.code.clone(),
            user_id: r.user_id,
            order_id: r.order_id,
            discount_amount: r.discount_amount.clone(),
            created_at: r.created_at,
        }
    }
}
