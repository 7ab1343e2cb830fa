//! In-process adapters used by the test suites: a single store behind all
//! repository ports, a notifier that records what it would have sent, and a
//! gateway that opens fake sessions but verifies webhooks for real.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bigdecimal::BigDecimal;
use chrono::Utc;
use uuid::Uuid;

use super::stripe::{decode_event, verify_signature};
use crate::domain::cart::{combined_quantity, CartItem, CartScope, Product};
use crate::domain::coupon::{Coupon, CouponRedemption};
use crate::domain::errors::{CouponRejection, DomainError};
use crate::domain::export::CreatedWindow;
use crate::domain::order::{LineItem, ListResult, Order, OrderStatus, OrderVersion};
use crate::domain::payment::{
    CheckoutSession, PaymentEvent, PaymentTransaction, Refund, SessionRequest, SessionSnapshot,
    SessionState, TransactionStatus,
};
use crate::domain::ports::{
    CartRepository, CouponRepository, Notifier, OrderRepository, PaymentGateway,
    PaymentRepository, ProductCatalog, UserDirectory,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    transactions: Vec<PaymentTransaction>,
    refunds: Vec<Refund>,
    cart: Vec<CartItem>,
    coupons: HashMap<String, Coupon>,
    redemptions: Vec<CouponRedemption>,
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn add_product(&self, name: &str, price: BigDecimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).products.insert(
            id,
            Product {
                id,
                name: name.to_string(),
                price,
                stock,
                image_url: None,
            },
        );
        id
    }

    pub fn remove_product(&self, id: Uuid) {
        lock(&self.state).products.remove(&id);
    }

    pub fn add_user(&self, id: Uuid, email: &str) {
        lock(&self.state).users.insert(id, email.to_string());
    }

    pub fn transactions(&self) -> Vec<PaymentTransaction> {
        lock(&self.state).transactions.clone()
    }
}

impl OrderRepository for InMemoryStore {
    fn insert(&self, order: &Order) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        if state.orders.contains_key(&order.id) {
            return Err(DomainError::Conflict(format!("order {} exists", order.id)));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DomainError> {
        Ok(lock(&self.state).orders.get(&id).cloned())
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, DomainError> {
        Ok(lock(&self.state)
            .orders
            .values()
            .find(|o| o.payment_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DomainError> {
        let mut orders: Vec<Order> = lock(&self.state)
            .orders
            .values()
            .filter(|o| o.user_id == Some(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    fn list(
        &self,
        status: Option<OrderStatus>,
        page: i64,
        limit: i64,
    ) -> Result<ListResult, DomainError> {
        let mut orders: Vec<Order> = lock(&self.state)
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = orders.len() as i64;
        let offset = ((page - 1) * limit).max(0) as usize;
        Ok(ListResult {
            items: orders.into_iter().skip(offset).take(limit as usize).collect(),
            total,
        })
    }

    fn list_created(&self, window: CreatedWindow) -> Result<Vec<Order>, DomainError> {
        let mut orders: Vec<Order> = lock(&self.state)
            .orders
            .values()
            .filter(|o| window.contains(o.created_at))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    fn replace(&self, order: &Order, expected: OrderVersion) -> Result<bool, DomainError> {
        let mut state = lock(&self.state);
        match state.orders.get_mut(&order.id) {
            Some(stored) if stored.version() == expected => {
                *stored = order.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DomainError::not_found("Order")),
        }
    }
}

impl PaymentRepository for InMemoryStore {
    fn insert_transaction(&self, tx: &PaymentTransaction) -> Result<(), DomainError> {
        lock(&self.state).transactions.push(tx.clone());
        Ok(())
    }

    fn find_transaction(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DomainError> {
        Ok(lock(&self.state)
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentTransaction>, DomainError> {
        Ok(lock(&self.state)
            .transactions
            .iter()
            .find(|t| t.checkout_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    fn settle_session(
        &self,
        session_id: &str,
        status: TransactionStatus,
    ) -> Result<usize, DomainError> {
        let now = Utc::now();
        let mut changed = 0;
        for tx in lock(&self.state).transactions.iter_mut() {
            if tx.checkout_session_id.as_deref() == Some(session_id) && !tx.status.is_settled() {
                tx.status = status;
                tx.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn insert_refund(&self, refund: &Refund) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        if state.refunds.iter().any(|r| r.order_id == refund.order_id) {
            return Err(DomainError::Conflict(format!(
                "order {} already has a refund",
                refund.order_id
            )));
        }
        state.refunds.push(refund.clone());
        Ok(())
    }

    fn find_refund(&self, id: Uuid) -> Result<Option<Refund>, DomainError> {
        Ok(lock(&self.state).refunds.iter().find(|r| r.id == id).cloned())
    }

    fn find_refund_for_order(&self, order_id: Uuid) -> Result<Option<Refund>, DomainError> {
        Ok(lock(&self.state)
            .refunds
            .iter()
            .find(|r| r.order_id == order_id)
            .cloned())
    }

    fn update_refund(&self, refund: &Refund) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        let stored = state
            .refunds
            .iter_mut()
            .find(|r| r.id == refund.id)
            .ok_or_else(|| DomainError::not_found("Refund"))?;
        *stored = refund.clone();
        Ok(())
    }
}

impl CartRepository for InMemoryStore {
    fn list(&self, scope: &CartScope) -> Result<Vec<CartItem>, DomainError> {
        Ok(lock(&self.state)
            .cart
            .iter()
            .filter(|i| &i.scope == scope)
            .cloned()
            .collect())
    }

    fn find(&self, id: Uuid) -> Result<Option<CartItem>, DomainError> {
        Ok(lock(&self.state).cart.iter().find(|i| i.id == id).cloned())
    }

    fn upsert_increment(
        &self,
        scope: &CartScope,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartItem, DomainError> {
        upsert(&mut lock(&self.state).cart, scope, product_id, quantity)
    }

    fn set_quantity(&self, id: Uuid, quantity: i32) -> Result<Option<CartItem>, DomainError> {
        let mut state = lock(&self.state);
        Ok(state.cart.iter_mut().find(|i| i.id == id).map(|item| {
            item.quantity = quantity;
            item.updated_at = Utc::now();
            item.clone()
        }))
    }

    fn delete(&self, id: Uuid) -> Result<bool, DomainError> {
        let mut state = lock(&self.state);
        let before = state.cart.len();
        state.cart.retain(|i| i.id != id);
        Ok(state.cart.len() < before)
    }

    fn clear(&self, scope: &CartScope) -> Result<usize, DomainError> {
        let mut state = lock(&self.state);
        let before = state.cart.len();
        state.cart.retain(|i| &i.scope != scope);
        Ok(before - state.cart.len())
    }

    fn transfer(&self, item: &CartItem, into: &CartScope) -> Result<bool, DomainError> {
        let mut state = lock(&self.state);
        let Some(pos) = state.cart.iter().position(|i| i.id == item.id) else {
            return Ok(false);
        };
        let source = state.cart.remove(pos);
        if let Err(e) = upsert(&mut state.cart, into, source.product_id, source.quantity) {
            state.cart.insert(pos, source);
            return Err(e);
        }
        Ok(true)
    }
}

fn upsert(
    cart: &mut Vec<CartItem>,
    scope: &CartScope,
    product_id: Uuid,
    quantity: i32,
) -> Result<CartItem, DomainError> {
    let now = Utc::now();
    if let Some(existing) = cart
        .iter_mut()
        .find(|i| &i.scope == scope && i.product_id == product_id)
    {
        existing.quantity = combined_quantity(product_id, existing.quantity, quantity)?;
        existing.updated_at = now;
        return Ok(existing.clone());
    }
    let item = CartItem {
        id: Uuid::new_v4(),
        scope: scope.clone(),
        product_id,
        quantity,
        created_at: now,
        updated_at: now,
    };
    cart.push(item.clone());
    Ok(item)
}

impl CouponRepository for InMemoryStore {
    fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, DomainError> {
        Ok(lock(&self.state).coupons.get(code).cloned())
    }

    fn list_active(&self) -> Result<Vec<Coupon>, DomainError> {
        let mut coupons: Vec<Coupon> = lock(&self.state)
            .coupons
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        coupons.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(coupons)
    }

    fn insert(&self, coupon: &Coupon) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        if state.coupons.contains_key(&coupon.code) {
            return Err(DomainError::Conflict(format!(
                "coupon {} already exists",
                coupon.code
            )));
        }
        state.coupons.insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }

    fn user_redemptions(&self, code: &str, user_id: Uuid) -> Result<i64, DomainError> {
        Ok(lock(&self.state)
            .redemptions
            .iter()
            .filter(|r| r.code == code && r.user_id == Some(user_id))
            .count() as i64)
    }

    fn update(&self, coupon: &Coupon) -> Result<bool, DomainError> {
        let mut state = lock(&self.state);
        let Some(stored) = state.coupons.get_mut(&coupon.code) else {
            return Ok(false);
        };
        *stored = Coupon {
            usage_count: stored.usage_count,
            created_at: stored.created_at,
            ..coupon.clone()
        };
        Ok(true)
    }

    fn redeem(&self, redemption: &CouponRedemption) -> Result<(), DomainError> {
        let mut state = lock(&self.state);
        let used_by_user = redemption.user_id.map_or(0, |user_id| {
            state
                .redemptions
                .iter()
                .filter(|r| r.code == redemption.code && r.user_id == Some(user_id))
                .count() as i64
        });
        let coupon = state
            .coupons
            .get_mut(&redemption.code)
            .ok_or(CouponRejection::NotFound)?;
        if coupon.usage_limit.is_some_and(|limit| coupon.usage_count >= limit) {
            return Err(CouponRejection::UsageLimitReached.into());
        }
        if redemption.user_id.is_some() && used_by_user >= i64::from(coupon.per_user_limit) {
            return Err(CouponRejection::AlreadyUsed.into());
        }
        coupon.usage_count += 1;
        state.redemptions.push(redemption.clone());
        Ok(())
    }

    fn release(&self, order_id: Uuid) -> Result<usize, DomainError> {
        let mut state = lock(&self.state);
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.redemptions)
            .into_iter()
            .partition(|r| r.order_id == order_id);
        state.redemptions = kept;
        for redemption in &dropped {
            if let Some(coupon) = state.coupons.get_mut(&redemption.code) {
                coupon.usage_count = (coupon.usage_count - 1).max(0);
            }
        }
        Ok(dropped.len())
    }
}

impl ProductCatalog for InMemoryStore {
    fn find(&self, id: Uuid) -> Result<Option<Product>, DomainError> {
        Ok(lock(&self.state).products.get(&id).cloned())
    }
}

impl UserDirectory for InMemoryStore {
    fn email_of(&self, user_id: Uuid) -> Result<Option<String>, DomainError> {
        Ok(lock(&self.state).users.get(&user_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    OrderConfirmation { email: String, order_id: Uuid },
    StatusUpdate { email: String, order_id: Uuid, status: OrderStatus },
    PasswordReset { email: String, link: String },
    RefundProcessed { email: String, order_id: Uuid, amount: BigDecimal },
}

/// Records every notification. A failing recorder still records, then errors.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    fn record(&self, n: Notification) -> Result<(), DomainError> {
        lock(&self.sent).push(n);
        if self.fail {
            return Err(DomainError::Unavailable("mail relay down".into()));
        }
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn order_confirmation(
        &self,
        email: &str,
        order_id: Uuid,
        _total: &BigDecimal,
        _items: &[LineItem],
    ) -> Result<(), DomainError> {
        self.record(Notification::OrderConfirmation {
            email: email.to_string(),
            order_id,
        })
    }

    fn order_status_update(
        &self,
        email: &str,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        self.record(Notification::StatusUpdate {
            email: email.to_string(),
            order_id,
            status,
        })
    }

    fn password_reset(&self, email: &str, link: &str) -> Result<(), DomainError> {
        self.record(Notification::PasswordReset {
            email: email.to_string(),
            link: link.to_string(),
        })
    }

    fn refund_processed(
        &self,
        email: &str,
        order_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DomainError> {
        self.record(Notification::RefundProcessed {
            email: email.to_string(),
            order_id,
            amount: amount.clone(),
        })
    }
}

/// Opens sessions locally and lets tests decide what the processor reports
/// for them. Webhooks go through the same signature check as the Stripe adapter.
pub struct InMemoryGateway {
    webhook_secret: String,
    tolerance_secs: i64,
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
    requests: Mutex<Vec<SessionRequest>>,
    unavailable: Mutex<bool>,
}

impl InMemoryGateway {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            tolerance_secs: 300,
            sessions: Mutex::default(),
            requests: Mutex::default(),
            unavailable: Mutex::new(false),
        }
    }

    pub fn set_unavailable(&self, down: bool) {
        *lock(&self.unavailable) = down;
    }

    /// What the next `retrieve_session` call reports for `session_id`.
    pub fn set_state(&self, session_id: &str, state: SessionState, payment_intent: Option<&str>) {
        if let Some(snapshot) = lock(&self.sessions).get_mut(session_id) {
            snapshot.state = state;
            snapshot.payment_intent_id = payment_intent.map(str::to_string);
        }
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        lock(&self.requests).clone()
    }

    fn check_up(&self) -> Result<(), DomainError> {
        if *lock(&self.unavailable) {
            return Err(DomainError::Unavailable("payment processor unreachable".into()));
        }
        Ok(())
    }
}

impl PaymentGateway for InMemoryGateway {
    fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, DomainError> {
        self.check_up()?;
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        lock(&self.sessions).insert(
            id.clone(),
            SessionSnapshot {
                id: id.clone(),
                state: SessionState::Open,
                order_id: Some(request.order_id),
                payment_intent_id: None,
            },
        );
        lock(&self.requests).push(request.clone());
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }

    fn retrieve_session(&self, session_id: &str) -> Result<SessionSnapshot, DomainError> {
        self.check_up()?;
        lock(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Checkout session"))
    }

    fn parse_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, DomainError> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )?;
        decode_event(payload)
    }
}
