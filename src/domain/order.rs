use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use super::errors::DomainError;
use super::money::round_money;
use super::requester::Caller;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Shipped, Cancelled],
            Shipped => &[Delivered, Returned],
            Delivered => &[Returned],
            Cancelled | Returned => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
    Refunded,
}

impl PaymentStatus {
    pub fn allowed_next(self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Pending => &[Completed, Failed, Expired],
            Completed => &[Refunded],
            Failed | Expired | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Completed,
    Rejected,
}

/// Price and name are copied from the catalog when the order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

impl LineItem {
    pub fn line_total(&self) -> BigDecimal {
        &self.unit_price * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTotals {
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub shipping: BigDecimal,
    pub total: BigDecimal,
}

impl OrderTotals {
    /// `total = subtotal - discount + shipping`; the discount never exceeds the subtotal.
    pub fn compute(items: &[LineItem], discount: &BigDecimal, shipping: &BigDecimal) -> Self {
        let subtotal = round_money(
            &items
                .iter()
                .fold(BigDecimal::zero(), |acc, item| acc + item.line_total()),
        );
        let discount = round_money(discount.max(&BigDecimal::zero()).min(&subtotal));
        let shipping = round_money(shipping.max(&BigDecimal::zero()));
        let total = round_money(&(&subtotal - &discount + &shipping));
        Self {
            subtotal,
            discount,
            shipping,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Cart session a guest order was placed from; proves ownership for guests.
    pub guest_session_id: Option<String>,
    pub customer_email: Option<String>,
    pub items: Vec<LineItem>,
    pub subtotal: BigDecimal,
    pub discount: BigDecimal,
    pub shipping: BigDecimal,
    pub total: BigDecimal,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub refund_status: Option<RefundStatus>,
    pub refund_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A freshly placed order: `pending` on both lifecycles with a single timeline entry.
    pub fn place(
        user_id: Option<Uuid>,
        items: Vec<LineItem>,
        totals: OrderTotals,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            guest_session_id: None,
            customer_email: None,
            items,
            subtotal: totals.subtotal,
            discount: totals.discount,
            shipping: totals.shipping,
            total: totals.total,
            coupon_code: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_session_id: None,
            payment_intent_id: None,
            paid_at: None,
            shipping_address: None,
            notes: None,
            tracking_number: None,
            refund_status: None,
            refund_reason: None,
            cancelled_at: None,
            timeline: vec![TimelineEntry {
                status: OrderStatus::Pending,
                timestamp: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `next` if the status table allows it and records it on the timeline.
    pub fn change_status(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition(format!(
                "cannot move order from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        if next == OrderStatus::Cancelled {
            self.cancelled_at = Some(now);
        }
        self.timeline.push(TimelineEntry {
            status: next,
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn change_payment_status(
        &mut self,
        next: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.payment_status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition(format!(
                "cannot move payment from {} to {}",
                self.payment_status, next
            )));
        }
        self.payment_status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Owners and admins may act on an order. A guest order belongs to whoever
    /// holds the cart session it was placed from.
    pub fn accessible_by(&self, caller: Caller<'_>) -> bool {
        match caller {
            Caller::User(requester) => requester.may_access(self.user_id),
            Caller::Guest(session) => {
                self.user_id.is_none()
                    && !session.is_empty()
                    && self.guest_session_id.as_deref() == Some(session)
            }
        }
    }

    /// The `(status, payment_status)` pair used as the compare-and-set guard on writes.
    pub fn version(&self) -> OrderVersion {
        OrderVersion {
            status: self.status,
            payment_status: self.payment_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderVersion {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    pub items: Vec<OrderLineInput>,
    /// Total the client showed the shopper; must agree with the computed total.
    pub declared_total: Option<BigDecimal>,
    pub cart_session_id: Option<String>,
    /// Contact address for guest checkouts.
    pub customer_email: Option<String>,
    pub coupon_code: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
}

impl OrderPatch {
    /// Fields a customer may change on their own order.
    pub const CUSTOMER_FIELDS: &'static [&'static str] = &["shipping_address", "notes"];

    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.shipping_address.is_some() {
            fields.push("shipping_address");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.tracking_number.is_some() {
            fields.push("tracking_number");
        }
        fields
    }

    pub fn restricted_fields(&self) -> Vec<&'static str> {
        self.touched_fields()
            .into_iter()
            .filter(|f| !Self::CUSTOMER_FIELDS.contains(f))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub items: Vec<Order>,
    pub total: i64,
}

/// Public tracking projection of an order.
#[derive(Debug, Clone)]
pub struct TrackingView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total: BigDecimal,
    pub tracking_number: Option<String>,
    pub items: Vec<LineItem>,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for TrackingView {
    fn from(o: Order) -> Self {
        Self {
            id: o.id,
            status: o.status,
            total: o.total,
            tracking_number: o.tracking_number,
            items: o.items,
            timeline: o.timeline,
            created_at: o.created_at,
        }
    }
}
