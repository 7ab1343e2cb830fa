use bigdecimal::BigDecimal;
use uuid::Uuid;

use super::cart::{CartItem, CartScope, Product};
use super::coupon::{Coupon, CouponRedemption};
use super::errors::DomainError;
use super::export::CreatedWindow;
use super::order::{LineItem, ListResult, Order, OrderStatus, OrderVersion};
use super::payment::{
    CheckoutSession, PaymentEvent, PaymentTransaction, Refund, SessionRequest, SessionSnapshot,
    TransactionStatus,
};
use super::requester::Requester;

pub trait OrderRepository: Send + Sync + 'static {
    fn insert(&self, order: &Order) -> Result<(), DomainError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DomainError>;
    fn find_by_session(&self, session_id: &str) -> Result<Option<Order>, DomainError>;
    fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, DomainError>;
    fn list(&self, status: Option<OrderStatus>, page: i64, limit: i64)
        -> Result<ListResult, DomainError>;
    /// Every order created inside `window`, newest first.
    fn list_created(&self, window: CreatedWindow) -> Result<Vec<Order>, DomainError>;
    /// Writes the mutable fields of `order` only if the stored row still has `expected`.
    /// Returns `false` when another writer got there first.
    fn replace(&self, order: &Order, expected: OrderVersion) -> Result<bool, DomainError>;
}

pub trait PaymentRepository: Send + Sync + 'static {
    fn insert_transaction(&self, tx: &PaymentTransaction) -> Result<(), DomainError>;
    fn find_transaction(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DomainError>;
    fn find_by_session(&self, session_id: &str)
        -> Result<Option<PaymentTransaction>, DomainError>;
    /// Moves every unsettled transaction of the session to `status`; returns how many changed.
    fn settle_session(&self, session_id: &str, status: TransactionStatus)
        -> Result<usize, DomainError>;
    fn insert_refund(&self, refund: &Refund) -> Result<(), DomainError>;
    fn find_refund(&self, id: Uuid) -> Result<Option<Refund>, DomainError>;
    fn find_refund_for_order(&self, order_id: Uuid) -> Result<Option<Refund>, DomainError>;
    fn update_refund(&self, refund: &Refund) -> Result<(), DomainError>;
}

pub trait CartRepository: Send + Sync + 'static {
    fn list(&self, scope: &CartScope) -> Result<Vec<CartItem>, DomainError>;
    fn find(&self, id: Uuid) -> Result<Option<CartItem>, DomainError>;
    /// Inserts the row or adds `quantity` to the existing `(scope, product)` row, atomically.
    fn upsert_increment(&self, scope: &CartScope, product_id: Uuid, quantity: i32)
        -> Result<CartItem, DomainError>;
    fn set_quantity(&self, id: Uuid, quantity: i32) -> Result<Option<CartItem>, DomainError>;
    fn delete(&self, id: Uuid) -> Result<bool, DomainError>;
    fn clear(&self, scope: &CartScope) -> Result<usize, DomainError>;
    /// Adds `item`'s quantity into `into` and deletes `item`, as one atomic step.
    /// A missing source row is a no-op returning `false`.
    fn transfer(&self, item: &CartItem, into: &CartScope) -> Result<bool, DomainError>;
}

pub trait CouponRepository: Send + Sync + 'static {
    fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, DomainError>;
    fn list_active(&self) -> Result<Vec<Coupon>, DomainError>;
    fn insert(&self, coupon: &Coupon) -> Result<(), DomainError>;
    /// Overwrites the editable fields of the stored coupon with the same code.
    /// `usage_count` is left alone. Returns `false` when no such coupon exists.
    fn update(&self, coupon: &Coupon) -> Result<bool, DomainError>;
    fn user_redemptions(&self, code: &str, user_id: Uuid) -> Result<i64, DomainError>;
    /// Bumps `usage_count` and records the redemption. Both limits are checked
    /// under the same lock as the write: `UsageLimitReached` when the coupon is
    /// used up, `AlreadyUsed` when the redeeming user is.
    fn redeem(&self, redemption: &CouponRedemption) -> Result<(), DomainError>;
    /// Drops the redemptions recorded for `order_id` and gives their uses back
    /// to `usage_count`. Returns how many were dropped.
    fn release(&self, order_id: Uuid) -> Result<usize, DomainError>;
}

pub trait ProductCatalog: Send + Sync + 'static {
    fn find(&self, id: Uuid) -> Result<Option<Product>, DomainError>;
}

pub trait UserDirectory: Send + Sync + 'static {
    fn email_of(&self, user_id: Uuid) -> Result<Option<String>, DomainError>;
}

pub trait PaymentGateway: Send + Sync + 'static {
    fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, DomainError>;
    fn retrieve_session(&self, session_id: &str) -> Result<SessionSnapshot, DomainError>;
    /// Authenticates and decodes a webhook body. Must fail with
    /// `DomainError::InvalidSignature` before looking at the payload when the
    /// signature does not verify.
    fn parse_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, DomainError>;
}

/// Outbound customer notifications. Callers treat every method as best effort.
pub trait Notifier: Send + Sync + 'static {
    fn order_confirmation(
        &self,
        email: &str,
        order_id: Uuid,
        total: &BigDecimal,
        items: &[LineItem],
    ) -> Result<(), DomainError>;
    fn order_status_update(
        &self,
        email: &str,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), DomainError>;
    fn password_reset(&self, email: &str, link: &str) -> Result<(), DomainError>;
    fn refund_processed(
        &self,
        email: &str,
        order_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DomainError>;
}

pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Option<Requester>;
}
