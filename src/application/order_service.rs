use std::sync::Arc;

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use uuid::Uuid;

use super::coupon_service::CouponService;
use super::{best_effort, load_owned_order, recipient_for};
use crate::domain::cart::{combined_quantity, CartScope};
use crate::domain::errors::DomainError;
use crate::domain::export::CreatedWindow;
use crate::domain::money::round_money;
use crate::domain::order::{
    LineItem, ListResult, NewOrder, Order, OrderLineInput, OrderPatch, OrderStatus, OrderTotals,
    OrderVersion, PaymentStatus, TimelineEntry, TrackingView,
};
use crate::domain::ports::{CartRepository, Notifier, OrderRepository, ProductCatalog, UserDirectory};
use crate::domain::requester::{Caller, Requester};

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
    carts: Arc<dyn CartRepository>,
    users: Arc<dyn UserDirectory>,
    coupons: Arc<CouponService>,
    notifier: Arc<dyn Notifier>,
    shipping_fee: BigDecimal,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
        carts: Arc<dyn CartRepository>,
        users: Arc<dyn UserDirectory>,
        coupons: Arc<CouponService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            catalog,
            carts,
            users,
            coupons,
            notifier,
            shipping_fee: BigDecimal::zero(),
        }
    }

    /// Flat shipping fee added to every order without a free-shipping coupon.
    pub fn with_shipping_fee(mut self, fee: BigDecimal) -> Self {
        self.shipping_fee = fee;
        self
    }

    pub fn create_order(
        &self,
        requester: Option<&Requester>,
        input: NewOrder,
    ) -> Result<Uuid, DomainError> {
        if input.items.is_empty() {
            return Err(DomainError::InvalidArgument("order has no items".into()));
        }
        let user_id = requester.map(|r| r.id);
        let cart_session = input
            .cart_session_id
            .filter(|s| !s.trim().is_empty());
        if user_id.is_none() && cart_session.is_none() {
            return Err(DomainError::InvalidArgument(
                "guest orders need the cart session_id".into(),
            ));
        }
        let items = self.snapshot_items(&input.items)?;

        let subtotal = OrderTotals::compute(&items, &BigDecimal::zero(), &BigDecimal::zero()).subtotal;
        let quote = match input.coupon_code.as_deref() {
            Some(code) if !code.trim().is_empty() => {
                Some(self.coupons.validate(code, &subtotal, user_id)?)
            }
            _ => None,
        };
        let discount = quote
            .as_ref()
            .map(|q| q.discount_amount.clone())
            .unwrap_or_else(BigDecimal::zero);
        let shipping = if quote.as_ref().is_some_and(|q| q.free_shipping) {
            BigDecimal::zero()
        } else {
            self.shipping_fee.clone()
        };
        let totals = OrderTotals::compute(&items, &discount, &shipping);

        if let Some(declared) = &input.declared_total {
            if round_money(declared) != totals.total {
                return Err(DomainError::InvalidArgument(format!(
                    "declared total {} does not match computed total {}",
                    declared, totals.total
                )));
            }
        }

        let mut order = Order::place(user_id, items, totals, Utc::now());
        if user_id.is_none() {
            order.guest_session_id = cart_session.clone();
        }
        order.customer_email = requester.map(|r| r.email.clone()).or(input.customer_email);
        order.shipping_address = input.shipping_address;
        order.notes = input.notes;
        order.coupon_code = quote.as_ref().map(|q| q.code.clone());

        if let Some(quote) = &quote {
            self.coupons.redeem(quote, user_id, order.id)?;
        }
        self.orders.insert(&order)?;
        log::info!(
            "order {} placed: {} items, total {}",
            order.id,
            order.items.len(),
            order.total
        );

        if let Some(session_id) = cart_session {
            self.clear_cart(&CartScope::Session(session_id), order.id);
        }
        if let Some(user_id) = user_id {
            self.clear_cart(&CartScope::User(user_id), order.id);
        }

        if let Some(email) = recipient_for(self.users.as_ref(), &order) {
            best_effort(
                "order confirmation",
                order.id,
                self.notifier
                    .order_confirmation(&email, order.id, &order.total, &order.items),
            );
        }

        Ok(order.id)
    }

    pub fn get_order<'a>(
        &self,
        order_id: Uuid,
        caller: impl Into<Caller<'a>>,
    ) -> Result<Order, DomainError> {
        load_owned_order(self.orders.as_ref(), order_id, caller.into())
    }

    pub fn update_order(
        &self,
        order_id: Uuid,
        patch: OrderPatch,
        requester: &Requester,
    ) -> Result<Order, DomainError> {
        let mut order = self.get_order(order_id, requester)?;
        let expected = order.version();
        let now = Utc::now();

        if let Some(status) = patch.status {
            order.change_status(status, now)?;
        }
        if !requester.is_admin() {
            let restricted = patch.restricted_fields();
            if !restricted.is_empty() {
                return Err(DomainError::Forbidden(format!(
                    "not allowed to update fields: {}",
                    restricted.join(", ")
                )));
            }
        }

        if let Some(address) = patch.shipping_address {
            order.shipping_address = Some(address);
        }
        if let Some(notes) = patch.notes {
            order.notes = Some(notes);
        }
        if let Some(tracking) = patch.tracking_number {
            order.tracking_number = Some(tracking);
        }
        order.updated_at = now;

        self.persist(&order, expected)?;
        if patch.status.is_some() {
            self.notify_status(&order);
        }
        Ok(order)
    }

    pub fn cancel_order<'a>(
        &self,
        order_id: Uuid,
        caller: impl Into<Caller<'a>>,
    ) -> Result<Order, DomainError> {
        let caller = caller.into();
        let mut order = self.get_order(order_id, caller)?;
        if !order.status.is_cancellable() {
            return Err(DomainError::InvalidTransition(format!(
                "cannot cancel order in status {}",
                order.status
            )));
        }
        let expected = order.version();
        order.change_status(OrderStatus::Cancelled, Utc::now())?;
        self.persist(&order, expected)?;
        self.coupons.release_for_order(order.id)?;
        log::info!("order {} cancelled by {}", order.id, caller);
        self.notify_status(&order);
        Ok(order)
    }

    /// Admin and internal status changes; no ownership check.
    pub fn set_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order, DomainError> {
        let mut order = self
            .orders
            .find_by_id(order_id)?
            .ok_or_else(|| DomainError::not_found("Order"))?;
        let expected = order.version();
        order.change_status(status, Utc::now())?;
        self.persist(&order, expected)?;
        if status == OrderStatus::Cancelled {
            self.coupons.release_for_order(order.id)?;
        }
        log::info!("order {} moved to {}", order.id, status);
        self.notify_status(&order);
        Ok(order)
    }

    pub fn list_for_user(&self, requester: &Requester) -> Result<Vec<Order>, DomainError> {
        self.orders.list_for_user(requester.id)
    }

    pub fn list_all(
        &self,
        status: Option<OrderStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, DomainError> {
        self.orders.list(status, page.max(1), limit.clamp(1, 100))
    }

    /// Orders created inside `window`, newest first, for the admin export.
    pub fn export(&self, window: CreatedWindow) -> Result<Vec<Order>, DomainError> {
        let orders = self.orders.list_created(window)?;
        log::info!(
            "exporting {} orders created between {:?} and {:?}",
            orders.len(),
            window.from,
            window.until
        );
        Ok(orders)
    }

    pub fn timeline(
        &self,
        order_id: Uuid,
        requester: &Requester,
    ) -> Result<(OrderStatus, Vec<TimelineEntry>), DomainError> {
        let order = self.get_order(order_id, requester)?;
        Ok((order.status, order.timeline))
    }

    pub fn track(&self, order_id: Uuid) -> Result<TrackingView, DomainError> {
        self.orders
            .find_by_id(order_id)?
            .map(TrackingView::from)
            .ok_or_else(|| DomainError::not_found("Order"))
    }

    /// Orders whose payment has reached a final outcome, newest first.
    pub fn payment_history(&self, requester: &Requester) -> Result<Vec<Order>, DomainError> {
        Ok(self
            .orders
            .list_for_user(requester.id)?
            .into_iter()
            .filter(|o| {
                matches!(
                    o.payment_status,
                    PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded
                )
            })
            .collect())
    }

    fn snapshot_items(&self, lines: &[OrderLineInput]) -> Result<Vec<LineItem>, DomainError> {
        let mut merged: Vec<OrderLineInput> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity < 1 {
                return Err(DomainError::InvalidArgument(format!(
                    "quantity for product {} must be at least 1",
                    line.product_id
                )));
            }
            match merged.iter_mut().find(|m| m.product_id == line.product_id) {
                Some(existing) => {
                    existing.quantity =
                        combined_quantity(line.product_id, existing.quantity, line.quantity)?
                }
                None => merged.push(line.clone()),
            }
        }

        merged
            .into_iter()
            .map(|line| {
                let product = self
                    .catalog
                    .find(line.product_id)?
                    .ok_or_else(|| DomainError::not_found(format!("Product {}", line.product_id)))?;
                if product.stock < line.quantity {
                    return Err(DomainError::Unavailable(format!(
                        "only {} of {} in stock",
                        product.stock, product.name
                    )));
                }
                Ok(LineItem {
                    product_id: product.id,
                    name: product.name,
                    unit_price: product.price,
                    quantity: line.quantity,
                })
            })
            .collect()
    }

    fn persist(&self, order: &Order, expected: OrderVersion) -> Result<(), DomainError> {
        if !self.orders.replace(order, expected)? {
            return Err(DomainError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }
        Ok(())
    }

    fn clear_cart(&self, scope: &CartScope, order_id: Uuid) {
        match self.carts.clear(scope) {
            Ok(n) => log::debug!("cleared {n} cart rows after order {order_id}"),
            Err(e) => log::warn!("could not clear cart after order {order_id}: {e}"),
        }
    }

    fn notify_status(&self, order: &Order) {
        if let Some(email) = recipient_for(self.users.as_ref(), order) {
            best_effort(
                "status update",
                order.id,
                self.notifier.order_status_update(&email, order.id, order.status),
            );
        }
    }
}
