use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::order::{OrderStatus, PaymentStatus, RefundStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    Pending,
    Completed,
    Failed,
    Expired,
}

impl TransactionStatus {
    /// Settled transactions are never rewritten by later events.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub checkout_session_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundOutcome {
    Completed,
    Rejected,
}

/// What the processor needs to open a hosted checkout.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Processor-side view of a checkout session, used by the polling path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    pub order_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Paid,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    SessionCompleted,
    SessionExpired,
    PaymentFailed,
    Other(String),
}

/// A verified event from the payment processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub id: String,
    pub kind: PaymentEventKind,
    pub session_id: Option<String>,
    pub order_id: Option<Uuid>,
    pub payment_intent_id: Option<String>,
}

impl PaymentEvent {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Option<Self> {
        let kind = match snapshot.state {
            SessionState::Paid => PaymentEventKind::SessionCompleted,
            SessionState::Expired => PaymentEventKind::SessionExpired,
            SessionState::Open => return None,
        };
        Some(Self {
            id: format!("poll:{}", snapshot.id),
            kind,
            session_id: Some(snapshot.id.clone()),
            order_id: snapshot.order_id,
            payment_intent_id: snapshot.payment_intent_id.clone(),
        })
    }
}

/// Result of applying a payment event to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Applied,
    /// Already in the target state; nothing was written.
    Duplicate,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub session_id: String,
    /// Transaction recorded when the session was opened.
    pub transaction_id: Uuid,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub order_id: Option<Uuid>,
}
