use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use uuid::Uuid;

use super::coupon_service::CouponService;
use super::{best_effort, load_owned_order, recipient_for};
use crate::domain::errors::DomainError;
use crate::domain::money::{round_money, to_minor_units};
use crate::domain::order::{Order, OrderStatus, PaymentStatus, RefundStatus};
use crate::domain::payment::{
    CheckoutSession, PaymentEvent, PaymentEventKind, PaymentTransaction, Reconciliation, Refund,
    RefundOutcome, SessionRequest, SessionStatus, TransactionStatus,
};
use crate::domain::ports::{
    Notifier, OrderRepository, PaymentGateway, PaymentRepository, UserDirectory,
};
use crate::domain::requester::{Caller, Requester};

/// Re-reads after a lost compare-and-set before giving up.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct PaymentService {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    users: Arc<dyn UserDirectory>,
    coupons: Arc<CouponService>,
    notifier: Arc<dyn Notifier>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        users: Arc<dyn UserDirectory>,
        coupons: Arc<CouponService>,
        notifier: Arc<dyn Notifier>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            payments,
            gateway,
            users,
            coupons,
            notifier,
            currency: currency.into(),
        }
    }

    /// Opens a hosted checkout for an unpaid order. Calling it again for the same
    /// order opens another processor session; the order itself is never duplicated.
    pub fn create_checkout_session<'a>(
        &self,
        order_id: Uuid,
        amount: &BigDecimal,
        caller: impl Into<Caller<'a>>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, DomainError> {
        let mut order = load_owned_order(self.orders.as_ref(), order_id, caller.into())?;
        if round_money(amount) != order.total {
            return Err(DomainError::InvalidArgument(format!(
                "amount {} does not match order total {}",
                amount, order.total
            )));
        }
        if order.status != OrderStatus::Pending || order.payment_status != PaymentStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "order {} is not awaiting payment ({} / {})",
                order.id, order.status, order.payment_status
            )));
        }

        let request = SessionRequest {
            order_id: order.id,
            user_id: order.user_id,
            amount_minor: to_minor_units(&order.total)?,
            currency: self.currency.clone(),
            description: format!("Order #{}", order.id),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        };
        let session = self.gateway.create_session(&request)?;
        log::info!("checkout session {} opened for order {}", session.id, order.id);

        let expected = order.version();
        let now = Utc::now();
        order.payment_session_id = Some(session.id.clone());
        order.updated_at = now;
        if !self.orders.replace(&order, expected)? {
            return Err(DomainError::Conflict(format!(
                "order {} changed while opening checkout",
                order.id
            )));
        }

        self.payments.insert_transaction(&PaymentTransaction {
            id: Uuid::new_v4(),
            order_id: Some(order.id),
            user_id: order.user_id,
            checkout_session_id: Some(session.id.clone()),
            amount: order.total.clone(),
            currency: self.currency.clone(),
            status: TransactionStatus::Initiated,
            retry_of: None,
            created_at: now,
            updated_at: now,
        })?;

        Ok(session)
    }

    /// Verifies and applies a raw processor webhook.
    pub fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<Reconciliation, DomainError> {
        let event = self.gateway.parse_event(payload, signature)?;
        self.handle_payment_event(&event)
    }

    pub fn handle_payment_event(&self, event: &PaymentEvent) -> Result<Reconciliation, DomainError> {
        let target = match &event.kind {
            PaymentEventKind::SessionCompleted => PaymentStatus::Completed,
            PaymentEventKind::SessionExpired => PaymentStatus::Expired,
            PaymentEventKind::PaymentFailed => PaymentStatus::Failed,
            PaymentEventKind::Other(kind) => {
                log::info!("ignoring payment event {} of kind {}", event.id, kind);
                return Ok(Reconciliation::Ignored);
            }
        };
        let Some(order_id) = event.order_id else {
            log::warn!("payment event {} carries no order id, ignoring", event.id);
            return Ok(Reconciliation::Ignored);
        };
        self.reconcile(order_id, event, target)
    }

    fn reconcile(
        &self,
        order_id: Uuid,
        event: &PaymentEvent,
        target: PaymentStatus,
    ) -> Result<Reconciliation, DomainError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut order = self
                .orders
                .find_by_id(order_id)?
                .ok_or_else(|| DomainError::not_found("Order"))?;

            // a non-success outcome only speaks for its own session; the order may
            // already be waiting on a newer one
            if let (Some(event_session), Some(current)) = (
                event.session_id.as_deref(),
                order.payment_session_id.as_deref(),
            ) {
                if target != PaymentStatus::Completed && event_session != current {
                    self.settle_session(event_session, target)?;
                    log::info!(
                        "payment event {} is for superseded session {} of order {}, ignoring",
                        event.id,
                        event_session,
                        order_id
                    );
                    return Ok(Reconciliation::Ignored);
                }
            }

            if order.payment_status == target {
                self.settle_transactions(event, &order, target)?;
                log::info!(
                    "payment event {} for order {} already applied",
                    event.id,
                    order_id
                );
                return Ok(Reconciliation::Duplicate);
            }
            if !order.payment_status.can_transition_to(target) {
                log::error!(
                    "payment event {} wants order {} payment {} -> {}, ignoring",
                    event.id,
                    order_id,
                    order.payment_status,
                    target
                );
                return Ok(Reconciliation::Ignored);
            }

            let expected = order.version();
            let now = Utc::now();
            order.change_payment_status(target, now)?;
            let follow_up = match target {
                PaymentStatus::Completed => {
                    order.payment_intent_id = event.payment_intent_id.clone();
                    order.paid_at = Some(now);
                    Some(OrderStatus::Confirmed)
                }
                PaymentStatus::Expired => Some(OrderStatus::Cancelled),
                _ => None,
            };
            let mut status_changed = false;
            if let Some(next) = follow_up {
                if order.status.can_transition_to(next) {
                    order.change_status(next, now)?;
                    status_changed = true;
                } else {
                    log::warn!(
                        "order {} is {}, leaving status as is after payment {}",
                        order_id,
                        order.status,
                        target
                    );
                }
            }

            if self.orders.replace(&order, expected)? {
                self.settle_transactions(event, &order, target)?;
                log::info!(
                    "payment event {} applied: order {} payment {}, status {}",
                    event.id,
                    order_id,
                    order.payment_status,
                    order.status
                );
                if status_changed {
                    if order.status == OrderStatus::Cancelled {
                        self.coupons.release_for_order(order_id)?;
                    }
                    self.notify_status(&order);
                }
                return Ok(Reconciliation::Applied);
            }
            log::debug!("order {order_id} changed under payment event {}, re-reading", event.id);
        }
        Err(DomainError::Conflict(format!(
            "order {order_id} kept changing while applying payment event {}",
            event.id
        )))
    }

    fn settle_transactions(
        &self,
        event: &PaymentEvent,
        order: &Order,
        target: PaymentStatus,
    ) -> Result<(), DomainError> {
        match event
            .session_id
            .as_deref()
            .or(order.payment_session_id.as_deref())
        {
            Some(session) => self.settle_session(session, target),
            None => Ok(()),
        }
    }

    fn settle_session(&self, session: &str, target: PaymentStatus) -> Result<(), DomainError> {
        let status = match target {
            PaymentStatus::Completed => TransactionStatus::Completed,
            PaymentStatus::Expired => TransactionStatus::Expired,
            PaymentStatus::Failed => TransactionStatus::Failed,
            _ => return Ok(()),
        };
        let changed = self.payments.settle_session(session, status)?;
        if changed > 0 {
            log::debug!("{changed} transactions of session {session} marked {status}");
        }
        Ok(())
    }

    /// Polling counterpart of the webhook: asks the processor about a session and
    /// applies what it reports.
    pub fn check_session_status<'a>(
        &self,
        session_id: &str,
        caller: impl Into<Caller<'a>>,
    ) -> Result<SessionStatus, DomainError> {
        let tx = self
            .payments
            .find_by_session(session_id)?
            .ok_or_else(|| DomainError::not_found("Payment session"))?;
        let order_id = tx
            .order_id
            .ok_or_else(|| DomainError::not_found("Order for payment session"))?;
        let mut order = load_owned_order(self.orders.as_ref(), order_id, caller.into())?;

        if order.payment_status == PaymentStatus::Pending {
            let snapshot = self.gateway.retrieve_session(session_id)?;
            if let Some(mut event) = PaymentEvent::from_snapshot(&snapshot) {
                event.order_id = event.order_id.or(Some(order_id));
                self.handle_payment_event(&event)?;
                order = self
                    .orders
                    .find_by_id(order_id)?
                    .ok_or_else(|| DomainError::not_found("Order"))?;
            }
        }

        Ok(SessionStatus {
            session_id: session_id.to_string(),
            transaction_id: tx.id,
            payment_status: order.payment_status,
            order_status: order.status,
            order_id: Some(order.id),
        })
    }

    /// One of the requester's payment transactions. Someone else's is reported
    /// as missing, as is an unknown id.
    pub fn get_transaction(
        &self,
        transaction_id: Uuid,
        requester: &Requester,
    ) -> Result<PaymentTransaction, DomainError> {
        self.payments
            .find_transaction(transaction_id)?
            .filter(|tx| requester.may_access(tx.user_id))
            .ok_or_else(|| DomainError::not_found("Payment transaction"))
    }

    /// Records a new attempt for a failed transaction. Does not contact the processor.
    pub fn retry_payment(
        &self,
        transaction_id: Uuid,
        requester: &Requester,
    ) -> Result<PaymentTransaction, DomainError> {
        let original = self
            .payments
            .find_transaction(transaction_id)?
            .ok_or_else(|| DomainError::not_found("Payment transaction"))?;
        if original.user_id != Some(requester.id) {
            return Err(DomainError::Forbidden(
                "payment transaction belongs to another customer".into(),
            ));
        }
        if original.status != TransactionStatus::Failed {
            return Err(DomainError::InvalidTransition(format!(
                "only failed transactions can be retried, this one is {}",
                original.status
            )));
        }

        let now = Utc::now();
        let retry = PaymentTransaction {
            id: Uuid::new_v4(),
            order_id: original.order_id,
            user_id: original.user_id,
            checkout_session_id: None,
            amount: original.amount.clone(),
            currency: original.currency.clone(),
            status: TransactionStatus::Pending,
            retry_of: Some(original.id),
            created_at: now,
            updated_at: now,
        };
        self.payments.insert_transaction(&retry)?;
        log::info!("transaction {} retries {}", retry.id, original.id);
        Ok(retry)
    }

    pub fn refund(
        &self,
        order_id: Uuid,
        requester: &Requester,
        reason: Option<String>,
    ) -> Result<Refund, DomainError> {
        let mut order = load_owned_order(self.orders.as_ref(), order_id, requester.into())?;
        if order.payment_status != PaymentStatus::Completed {
            return Err(DomainError::InvalidTransition(
                "only completed payments can be refunded".into(),
            ));
        }
        if order.refund_status.is_some() || self.payments.find_refund_for_order(order.id)?.is_some()
        {
            return Err(DomainError::Conflict(format!(
                "a refund was already requested for order {}",
                order.id
            )));
        }

        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            order_id: order.id,
            user_id: order.user_id,
            amount: order.total.clone(),
            reason: reason.clone(),
            status: RefundStatus::Pending,
            created_at: now,
            resolved_at: None,
        };
        self.payments.insert_refund(&refund)?;

        let expected = order.version();
        order.refund_status = Some(RefundStatus::Pending);
        order.refund_reason = reason;
        order.updated_at = now;
        if !self.orders.replace(&order, expected)? {
            return Err(DomainError::Conflict(format!(
                "order {} changed while requesting refund {}",
                order.id, refund.id
            )));
        }
        log::info!("refund {} requested for order {}", refund.id, order.id);
        Ok(refund)
    }

    /// Records the processor's verdict on a pending refund. Safe to repeat after a
    /// partial failure.
    pub fn resolve_refund(
        &self,
        refund_id: Uuid,
        outcome: RefundOutcome,
    ) -> Result<Refund, DomainError> {
        let mut refund = self
            .payments
            .find_refund(refund_id)?
            .ok_or_else(|| DomainError::not_found("Refund"))?;
        if refund.status != RefundStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "refund {} is already {}",
                refund.id, refund.status
            )));
        }
        let mut order = self
            .orders
            .find_by_id(refund.order_id)?
            .ok_or_else(|| DomainError::not_found("Order"))?;

        let now = Utc::now();
        let new_status = match outcome {
            RefundOutcome::Completed => RefundStatus::Completed,
            RefundOutcome::Rejected => RefundStatus::Rejected,
        };
        if order.refund_status != Some(new_status) {
            let expected = order.version();
            if outcome == RefundOutcome::Completed
                && order.payment_status != PaymentStatus::Refunded
            {
                order.change_payment_status(PaymentStatus::Refunded, now)?;
            }
            order.refund_status = Some(new_status);
            order.updated_at = now;
            if !self.orders.replace(&order, expected)? {
                return Err(DomainError::Conflict(format!(
                    "order {} changed while resolving refund {}",
                    order.id, refund.id
                )));
            }
        }

        refund.status = new_status;
        refund.resolved_at = Some(now);
        self.payments.update_refund(&refund)?;
        log::info!("refund {} {}", refund.id, refund.status);

        if outcome == RefundOutcome::Completed {
            if let Some(email) = recipient_for(self.users.as_ref(), &order) {
                best_effort(
                    "refund",
                    order.id,
                    self.notifier.refund_processed(&email, order.id, &refund.amount),
                );
            }
        }
        Ok(refund)
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

#[cfg(test)]
mod tests {
    use bigdecimal::Zero;
    use serde_json::json;

    use super::*;
    use crate::domain::coupon::{CouponRedemption, DiscountType, NewCoupon};
    use crate::domain::order::{LineItem, OrderTotals};
    use crate::domain::payment::SessionState;
    use crate::domain::ports::CouponRepository;
    use crate::domain::requester::Role;
    use crate::infrastructure::memory::{
        InMemoryGateway, InMemoryStore, Notification, RecordingNotifier,
    };
    use crate::infrastructure::stripe::signature_header;

    const SECRET: &str = "whsec_unit";
    const SUCCESS: &str = "https://shop.test/ok";
    const CANCEL: &str = "https://shop.test/cancel";

    struct Harness {
        store: Arc<InMemoryStore>,
        gateway: Arc<InMemoryGateway>,
        notifier: Arc<RecordingNotifier>,
        service: PaymentService,
        customer: Requester,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(InMemoryGateway::new(SECRET));
        let notifier = Arc::new(RecordingNotifier::default());
        let service = PaymentService::new(
            store.clone(),
            store.clone(),
            gateway.clone(),
            store.clone(),
            Arc::new(CouponService::new(store.clone())),
            notifier.clone(),
            "inr",
        );
        let customer = Requester {
            id: Uuid::new_v4(),
            email: "buyer@example.com".into(),
            role: Role::Customer,
        };
        store.add_user(customer.id, &customer.email);
        Harness {
            store,
            gateway,
            notifier,
            service,
            customer,
        }
    }

    fn lamp_order(user_id: Option<Uuid>) -> Order {
        let items = vec![LineItem {
            product_id: Uuid::new_v4(),
            name: "Lamp".into(),
            unit_price: BigDecimal::from(500),
            quantity: 2,
        }];
        let totals = OrderTotals::compute(&items, &BigDecimal::zero(), &BigDecimal::zero());
        Order::place(user_id, items, totals, Utc::now())
    }

    fn stranger() -> Requester {
        Requester {
            id: Uuid::new_v4(),
            email: "other@example.com".into(),
            role: Role::Customer,
        }
    }

    impl Harness {
        /// A pending order for the customer totalling 1000.00.
        fn place_order(&self) -> Order {
            let order = lamp_order(Some(self.customer.id));
            OrderRepository::insert(self.store.as_ref(), &order).unwrap();
            order
        }

        fn place_guest_order(&self, cart_session: &str) -> Order {
            let mut order = lamp_order(None);
            order.guest_session_id = Some(cart_session.to_string());
            order.customer_email = Some("guest@example.com".into());
            OrderRepository::insert(self.store.as_ref(), &order).unwrap();
            order
        }

        fn order(&self, id: Uuid) -> Order {
            self.store.find_by_id(id).unwrap().unwrap()
        }

        fn checkout(&self, order: &Order) -> CheckoutSession {
            self.service
                .create_checkout_session(order.id, &order.total, &self.customer, SUCCESS, CANCEL)
                .unwrap()
        }

        fn status_updates(&self) -> Vec<OrderStatus> {
            self.notifier
                .sent()
                .into_iter()
                .filter_map(|n| match n {
                    Notification::StatusUpdate { status, .. } => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    fn event(kind: PaymentEventKind, order_id: Option<Uuid>, session: &str) -> PaymentEvent {
        PaymentEvent {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            kind,
            session_id: Some(session.to_string()),
            order_id,
            payment_intent_id: Some("pi_123".into()),
        }
    }

    #[test]
    fn checkout_rejects_amount_that_differs_from_total() {
        let h = harness();
        let order = h.place_order();
        let err = h
            .service
            .create_checkout_session(order.id, &BigDecimal::from(999), &h.customer, SUCCESS, CANCEL)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        assert!(h.gateway.requests().is_empty());
    }

    #[test]
    fn checkout_records_session_and_transaction() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);

        let request = &h.gateway.requests()[0];
        assert_eq!(request.amount_minor, 100_000);
        assert_eq!(request.currency, "inr");
        assert_eq!(request.order_id, order.id);

        assert_eq!(h.order(order.id).payment_session_id, Some(session.id.clone()));
        let txs = h.store.transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Initiated);
        assert_eq!(txs[0].checkout_session_id, Some(session.id));
    }

    #[test]
    fn second_checkout_opens_another_session_for_the_same_order() {
        let h = harness();
        let order = h.place_order();
        let first = h.checkout(&order);
        let second = h.checkout(&order);
        assert_ne!(first.id, second.id);
        assert_eq!(h.store.transactions().len(), 2);
        assert_eq!(h.order(order.id).payment_session_id, Some(second.id));
    }

    #[test]
    fn checkout_by_another_customer_is_forbidden() {
        let h = harness();
        let order = h.place_order();
        let err = h
            .service
            .create_checkout_session(order.id, &order.total, &stranger(), SUCCESS, CANCEL)
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn transactions_are_visible_to_their_owner_and_admins_only() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);
        let status = h.service.check_session_status(&session.id, &h.customer).unwrap();

        let tx = h
            .service
            .get_transaction(status.transaction_id, &h.customer)
            .unwrap();
        assert_eq!(tx.order_id, Some(order.id));
        assert_eq!(tx.checkout_session_id, Some(session.id));
        assert_eq!(tx.status, TransactionStatus::Initiated);

        let admin = Requester {
            role: Role::Admin,
            ..stranger()
        };
        assert!(h.service.get_transaction(tx.id, &admin).is_ok());
        assert!(matches!(
            h.service.get_transaction(tx.id, &stranger()),
            Err(DomainError::NotFound(_))
        ));
        assert!(matches!(
            h.service.get_transaction(Uuid::new_v4(), &h.customer),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn processor_outage_is_retryable_and_leaves_order_untouched() {
        let h = harness();
        let order = h.place_order();
        h.gateway.set_unavailable(true);
        let err = h
            .service
            .create_checkout_session(order.id, &order.total, &h.customer, SUCCESS, CANCEL)
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.order(order.id).payment_session_id, None);
        assert!(h.store.transactions().is_empty());
    }

    #[test]
    fn completed_event_is_applied_once() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);
        let completed = event(PaymentEventKind::SessionCompleted, Some(order.id), &session.id);

        assert_eq!(
            h.service.handle_payment_event(&completed).unwrap(),
            Reconciliation::Applied
        );
        let after_first = h.order(order.id);
        assert_eq!(
            h.service.handle_payment_event(&completed).unwrap(),
            Reconciliation::Duplicate
        );
        let after_replay = h.order(order.id);

        assert_eq!(after_first, after_replay);
        assert_eq!(after_replay.status, OrderStatus::Confirmed);
        assert_eq!(after_replay.payment_status, PaymentStatus::Completed);
        assert_eq!(after_replay.payment_intent_id.as_deref(), Some("pi_123"));
        assert!(after_replay.paid_at.is_some());
        assert_eq!(after_replay.timeline.len(), 2);
        assert_eq!(h.status_updates(), vec![OrderStatus::Confirmed]);
        assert!(h
            .store
            .transactions()
            .iter()
            .all(|t| t.status == TransactionStatus::Completed));
    }

    #[test]
    fn expired_event_cancels_and_later_success_is_ignored() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);

        h.service
            .handle_payment_event(&event(PaymentEventKind::SessionExpired, Some(order.id), &session.id))
            .unwrap();
        let expired = h.order(order.id);
        assert_eq!(expired.payment_status, PaymentStatus::Expired);
        assert_eq!(expired.status, OrderStatus::Cancelled);
        assert!(expired.cancelled_at.is_some());

        let late = event(PaymentEventKind::SessionCompleted, Some(order.id), &session.id);
        assert_eq!(
            h.service.handle_payment_event(&late).unwrap(),
            Reconciliation::Ignored
        );
        assert_eq!(h.order(order.id), expired);
        assert_eq!(h.status_updates(), vec![OrderStatus::Cancelled]);
        assert_eq!(h.store.transactions()[0].status, TransactionStatus::Expired);
    }

    #[test]
    fn expiry_gives_the_coupon_use_back() {
        let h = harness();
        let order = h.place_order();
        let now = Utc::now();
        let coupon = NewCoupon {
            code: "WELCOME".into(),
            discount_type: DiscountType::Fixed,
            value: BigDecimal::from(50),
            min_order_value: BigDecimal::zero(),
            max_discount: None,
            valid_from: now - chrono::Duration::days(1),
            valid_until: now + chrono::Duration::days(1),
            usage_limit: Some(1),
            per_user_limit: 1,
        }
        .into_coupon(now)
        .unwrap();
        CouponRepository::insert(h.store.as_ref(), &coupon).unwrap();
        h.store
            .redeem(&CouponRedemption {
                id: Uuid::new_v4(),
                code: "WELCOME".into(),
                user_id: Some(h.customer.id),
                order_id: order.id,
                discount_amount: BigDecimal::from(50),
                created_at: now,
            })
            .unwrap();
        let session = h.checkout(&order);

        h.service
            .handle_payment_event(&event(PaymentEventKind::SessionExpired, Some(order.id), &session.id))
            .unwrap();

        assert_eq!(h.store.find_by_code("WELCOME").unwrap().unwrap().usage_count, 0);
        assert_eq!(h.store.user_redemptions("WELCOME", h.customer.id).unwrap(), 0);
    }

    #[test]
    fn expiry_of_a_superseded_session_leaves_the_order_payable() {
        let h = harness();
        let order = h.place_order();
        let first = h.checkout(&order);
        let second = h.checkout(&order);

        let stale = event(PaymentEventKind::SessionExpired, Some(order.id), &first.id);
        assert_eq!(
            h.service.handle_payment_event(&stale).unwrap(),
            Reconciliation::Ignored
        );
        let waiting = h.order(order.id);
        assert_eq!(waiting.status, OrderStatus::Pending);
        assert_eq!(waiting.payment_status, PaymentStatus::Pending);
        assert_eq!(waiting.payment_session_id, Some(second.id.clone()));
        let by_session: Vec<(Option<String>, TransactionStatus)> = h
            .store
            .transactions()
            .into_iter()
            .map(|t| (t.checkout_session_id, t.status))
            .collect();
        assert!(by_session.contains(&(Some(first.id.clone()), TransactionStatus::Expired)));
        assert!(by_session.contains(&(Some(second.id.clone()), TransactionStatus::Initiated)));

        let paid = event(PaymentEventKind::SessionCompleted, Some(order.id), &second.id);
        assert_eq!(
            h.service.handle_payment_event(&paid).unwrap(),
            Reconciliation::Applied
        );
        let confirmed = h.order(order.id);
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Completed);
        assert!(h.status_updates().iter().all(|s| *s != OrderStatus::Cancelled));
    }

    #[test]
    fn failure_of_a_superseded_session_is_ignored() {
        let h = harness();
        let order = h.place_order();
        let first = h.checkout(&order);
        h.checkout(&order);

        let stale = event(PaymentEventKind::PaymentFailed, Some(order.id), &first.id);
        assert_eq!(
            h.service.handle_payment_event(&stale).unwrap(),
            Reconciliation::Ignored
        );
        assert_eq!(h.order(order.id).payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn paying_an_older_session_confirms_without_moving_the_session_id() {
        let h = harness();
        let order = h.place_order();
        let first = h.checkout(&order);
        let second = h.checkout(&order);

        let paid = event(PaymentEventKind::SessionCompleted, Some(order.id), &first.id);
        assert_eq!(
            h.service.handle_payment_event(&paid).unwrap(),
            Reconciliation::Applied
        );
        let confirmed = h.order(order.id);
        assert_eq!(confirmed.payment_status, PaymentStatus::Completed);
        assert_eq!(confirmed.payment_session_id, Some(second.id));
    }

    #[test]
    fn guest_order_is_paid_through_its_cart_session() {
        let h = harness();
        let order = h.place_guest_order("guest-cart");

        assert!(matches!(
            h.service.create_checkout_session(
                order.id,
                &order.total,
                Caller::Guest("other-cart"),
                SUCCESS,
                CANCEL
            ),
            Err(DomainError::Forbidden(_))
        ));
        let session = h
            .service
            .create_checkout_session(
                order.id,
                &order.total,
                Caller::Guest("guest-cart"),
                SUCCESS,
                CANCEL,
            )
            .unwrap();
        assert_eq!(h.gateway.requests()[0].user_id, None);

        h.gateway.set_state(&session.id, SessionState::Paid, Some("pi_guest"));
        let status = h
            .service
            .check_session_status(&session.id, Caller::Guest("guest-cart"))
            .unwrap();
        assert_eq!(status.payment_status, PaymentStatus::Completed);
        assert_eq!(status.order_status, OrderStatus::Confirmed);
        assert!(matches!(
            h.service.check_session_status(&session.id, &stranger()),
            Err(DomainError::Forbidden(_))
        ));
        assert!(h.notifier.sent().contains(&Notification::StatusUpdate {
            email: "guest@example.com".into(),
            order_id: order.id,
            status: OrderStatus::Confirmed,
        }));
    }

    #[test]
    fn failed_payment_keeps_order_status() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);

        h.service
            .handle_payment_event(&event(PaymentEventKind::PaymentFailed, Some(order.id), &session.id))
            .unwrap();
        let failed = h.order(order.id);
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(failed.status, OrderStatus::Pending);
        assert!(h.status_updates().is_empty());
        assert_eq!(h.store.transactions()[0].status, TransactionStatus::Failed);
    }

    #[test]
    fn events_without_order_or_of_unknown_kind_are_ignored() {
        let h = harness();
        let order = h.place_order();
        let orphan = event(PaymentEventKind::SessionCompleted, None, "cs_x");
        let unknown = event(PaymentEventKind::Other("charge.refunded".into()), Some(order.id), "cs_x");
        assert_eq!(h.service.handle_payment_event(&orphan).unwrap(), Reconciliation::Ignored);
        assert_eq!(h.service.handle_payment_event(&unknown).unwrap(), Reconciliation::Ignored);
        assert_eq!(h.order(order.id).payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn webhook_signature_is_checked_before_anything_else() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);
        let payload = serde_json::to_vec(&json!({
            "id": "evt_signed",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": session.id,
                "payment_intent": "pi_signed",
                "metadata": {"order_id": order.id.to_string()}
            }}
        }))
        .unwrap();

        let forged = signature_header(&payload, "whsec_wrong", Utc::now().timestamp()).unwrap();
        assert!(matches!(
            h.service.handle_webhook(&payload, &forged),
            Err(DomainError::InvalidSignature)
        ));
        assert_eq!(h.order(order.id).payment_status, PaymentStatus::Pending);

        let genuine = signature_header(&payload, SECRET, Utc::now().timestamp()).unwrap();
        assert_eq!(
            h.service.handle_webhook(&payload, &genuine).unwrap(),
            Reconciliation::Applied
        );
        assert_eq!(
            h.order(order.id).payment_intent_id.as_deref(),
            Some("pi_signed")
        );
    }

    #[test]
    fn polling_applies_what_the_processor_reports() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);

        let open = h.service.check_session_status(&session.id, &h.customer).unwrap();
        assert_eq!(open.payment_status, PaymentStatus::Pending);

        h.gateway.set_state(&session.id, SessionState::Paid, Some("pi_poll"));
        let paid = h.service.check_session_status(&session.id, &h.customer).unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Completed);
        assert_eq!(paid.order_status, OrderStatus::Confirmed);
        assert_eq!(paid.order_id, Some(order.id));

        // settled orders are answered without asking the processor again
        h.gateway.set_unavailable(true);
        assert!(h.service.check_session_status(&session.id, &h.customer).is_ok());
        assert!(matches!(
            h.service.check_session_status(&session.id, &stranger()),
            Err(DomainError::Forbidden(_))
        ));
    }

    #[test]
    fn only_failed_transactions_of_the_owner_can_be_retried() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);
        let initiated = h.store.transactions()[0].clone();

        assert!(matches!(
            h.service.retry_payment(initiated.id, &h.customer),
            Err(DomainError::InvalidTransition(_))
        ));
        assert!(matches!(
            h.service.retry_payment(Uuid::new_v4(), &h.customer),
            Err(DomainError::NotFound(_))
        ));

        h.service
            .handle_payment_event(&event(PaymentEventKind::PaymentFailed, Some(order.id), &session.id))
            .unwrap();
        assert!(matches!(
            h.service.retry_payment(initiated.id, &stranger()),
            Err(DomainError::Forbidden(_))
        ));

        let retry = h.service.retry_payment(initiated.id, &h.customer).unwrap();
        assert_eq!(retry.status, TransactionStatus::Pending);
        assert_eq!(retry.retry_of, Some(initiated.id));
        assert_eq!(retry.amount, initiated.amount);
        assert_eq!(retry.order_id, Some(order.id));
        assert_eq!(h.store.transactions().len(), 2);
        assert_eq!(h.gateway.requests().len(), 1);
    }

    #[test]
    fn refund_lifecycle() {
        let h = harness();
        let order = h.place_order();
        assert!(matches!(
            h.service.refund(order.id, &h.customer, None),
            Err(DomainError::InvalidTransition(_))
        ));

        let session = h.checkout(&order);
        h.service
            .handle_payment_event(&event(PaymentEventKind::SessionCompleted, Some(order.id), &session.id))
            .unwrap();

        let refund = h
            .service
            .refund(order.id, &h.customer, Some("arrived broken".into()))
            .unwrap();
        assert_eq!(refund.status, RefundStatus::Pending);
        assert_eq!(refund.amount, order.total);
        let pending = h.order(order.id);
        assert_eq!(pending.refund_status, Some(RefundStatus::Pending));
        assert_eq!(pending.refund_reason.as_deref(), Some("arrived broken"));

        assert!(matches!(
            h.service.refund(order.id, &h.customer, None),
            Err(DomainError::Conflict(_))
        ));

        let resolved = h
            .service
            .resolve_refund(refund.id, RefundOutcome::Completed)
            .unwrap();
        assert_eq!(resolved.status, RefundStatus::Completed);
        assert!(resolved.resolved_at.is_some());
        let refunded = h.order(order.id);
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(refunded.refund_status, Some(RefundStatus::Completed));
        assert!(h.notifier.sent().contains(&Notification::RefundProcessed {
            email: h.customer.email.clone(),
            order_id: order.id,
            amount: order.total.clone(),
        }));

        assert!(matches!(
            h.service.resolve_refund(refund.id, RefundOutcome::Rejected),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn rejected_refund_keeps_payment_completed() {
        let h = harness();
        let order = h.place_order();
        let session = h.checkout(&order);
        h.service
            .handle_payment_event(&event(PaymentEventKind::SessionCompleted, Some(order.id), &session.id))
            .unwrap();
        let refund = h.service.refund(order.id, &h.customer, None).unwrap();

        h.service
            .resolve_refund(refund.id, RefundOutcome::Rejected)
            .unwrap();
        let order = h.order(order.id);
        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.refund_status, Some(RefundStatus::Rejected));
        assert!(!h
            .notifier
            .sent()
            .iter()
            .any(|n| matches!(n, Notification::RefundProcessed { .. })));
    }
}
