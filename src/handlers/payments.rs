use actix_web::{web, HttpRequest, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::orders::OrderResponse;
use super::{blocking, Admin, Authenticated, MaybeAuthenticated, Party};
use crate::domain::order::{OrderStatus, PaymentStatus, RefundStatus};
use crate::domain::payment::{
    PaymentTransaction, Reconciliation, Refund, RefundOutcome, SessionStatus, TransactionStatus,
};
use crate::errors::AppError;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    /// Must equal the order total, e.g. "1000.00".
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    /// Cart session of a guest order. Ignored when a token is sent.
    pub session_id: Option<String>,
}

/// The path already names a checkout session, so the guest's cart session
/// travels as `cart_session`.
#[derive(Debug, Deserialize)]
pub struct GuestCartQuery {
    pub cart_session: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: String,
    /// Look it up with `GET /payments/{id}`.
    pub transaction_id: Uuid,
    pub order_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub payment_status: PaymentStatus,
}

impl From<SessionStatus> for SessionStatusResponse {
    fn from(s: SessionStatus) -> Self {
        Self {
            session_id: s.session_id,
            transaction_id: s.transaction_id,
            order_id: s.order_id,
            status: s.order_status,
            payment_status: s.payment_status,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub received: bool,
    /// `applied`, `duplicate` or `ignored`.
    pub result: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RetryPaymentRequest {
    pub transaction_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub currency: String,
    #[schema(value_type = String)]
    pub status: TransactionStatus,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentTransaction> for TransactionResponse {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            id: tx.id,
            order_id: tx.order_id,
            amount: tx.amount,
            currency: tx.currency,
            status: tx.status,
            retry_of: tx.retry_of,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundRequest {
    pub order_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveRefundRequest {
    /// `completed` or `rejected`.
    #[schema(value_type = String)]
    pub outcome: RefundOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub reason: Option<String>,
    #[schema(value_type = String)]
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<Refund> for RefundResponse {
    fn from(r: Refund) -> Self {
        Self {
            id: r.id,
            order_id: r.order_id,
            amount: r.amount,
            reason: r.reason,
            status: r.status,
            created_at: r.created_at,
            resolved_at: r.resolved_at,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /checkout/session
///
/// Opens a hosted checkout page for an unpaid order.
#[utoipa::path(
    post,
    path = "/checkout/session",
    request_body = CheckoutSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = CheckoutSessionResponse),
        (status = 400, description = "Amount mismatch or order not awaiting payment"),
        (status = 401, description = "Neither a token nor a session_id"),
        (status = 403, description = "Order belongs to another customer"),
        (status = 503, description = "Payment processor unavailable, retry later"),
    ),
    tag = "payments",
    security((), ("bearer_auth" = []))
)]
pub async fn create_checkout_session(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    body: web::Json<CheckoutSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let CheckoutSessionRequest {
        order_id,
        amount,
        session_id,
    } = body.into_inner();
    let party = Party::resolve(caller.0, session_id)?;
    let success_url = format!(
        "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
        state.public_base_url
    );
    let cancel_url = format!("{}/checkout/cancel", state.public_base_url);
    let payments = state.payments.clone();
    let session = blocking(move || {
        payments.create_checkout_session(
            order_id,
            &amount,
            party.as_caller(),
            &success_url,
            &cancel_url,
        )
    })
    .await?;
    Ok(HttpResponse::Ok().json(CheckoutSessionResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// GET /checkout/status/{session_id}
///
/// Polls the processor when the payment is still pending and applies the outcome.
#[utoipa::path(
    get,
    path = "/checkout/status/{session_id}",
    params(
        ("session_id" = String, Path, description = "Checkout session ID"),
        ("cart_session" = Option<String>, Query, description = "Cart session of a guest order"),
    ),
    responses(
        (status = 200, description = "Current order and payment status", body = SessionStatusResponse),
        (status = 401, description = "Neither a token nor a cart_session"),
        (status = 403, description = "Order belongs to another customer"),
        (status = 404, description = "Unknown session"),
    ),
    tag = "payments",
    security((), ("bearer_auth" = []))
)]
pub async fn session_status(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    path: web::Path<String>,
    guest: web::Query<GuestCartQuery>,
) -> Result<HttpResponse, AppError> {
    let party = Party::resolve(caller.0, guest.into_inner().cart_session)?;
    let session_id = path.into_inner();
    let payments = state.payments.clone();
    let status =
        blocking(move || payments.check_session_status(&session_id, party.as_caller())).await?;
    Ok(HttpResponse::Ok().json(SessionStatusResponse::from(status)))
}

/// POST /payments/webhook
///
/// Processor callback. The raw body is needed for signature verification.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted", body = WebhookResponse),
        (status = 400, description = "Missing or invalid signature"),
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(format!("Missing {SIGNATURE_HEADER} header")))?
        .to_string();
    let payments = state.payments.clone();
    let outcome = blocking(move || payments.handle_webhook(&body, &signature))
        .await
        .inspect_err(|e| log::warn!("payment webhook rejected: {e}"))?;
    let result = match outcome {
        Reconciliation::Applied => "applied",
        Reconciliation::Duplicate => "duplicate",
        Reconciliation::Ignored => "ignored",
    };
    Ok(HttpResponse::Ok().json(WebhookResponse {
        received: true,
        result: result.to_string(),
    }))
}

/// POST /payments/retry
#[utoipa::path(
    post,
    path = "/payments/retry",
    request_body = RetryPaymentRequest,
    responses(
        (status = 201, description = "Retry recorded", body = TransactionResponse),
        (status = 400, description = "Transaction has not failed"),
        (status = 403, description = "Transaction belongs to another customer"),
        (status = 404, description = "Unknown transaction"),
    ),
    tag = "payments",
    security(("bearer_auth" = []))
)]
pub async fn retry_payment(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    body: web::Json<RetryPaymentRequest>,
) -> Result<HttpResponse, AppError> {
    let transaction_id = body.into_inner().transaction_id;
    let payments = state.payments.clone();
    let tx = blocking(move || payments.retry_payment(transaction_id, &requester)).await?;
    Ok(HttpResponse::Created().json(TransactionResponse::from(tx)))
}

/// POST /payments/refund
#[utoipa::path(
    post,
    path = "/payments/refund",
    request_body = RefundRequest,
    responses(
        (status = 201, description = "Refund requested", body = RefundResponse),
        (status = 400, description = "Payment not completed"),
        (status = 409, description = "Refund already requested"),
    ),
    tag = "payments",
    security(("bearer_auth" = []))
)]
pub async fn request_refund(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    body: web::Json<RefundRequest>,
) -> Result<HttpResponse, AppError> {
    let RefundRequest { order_id, reason } = body.into_inner();
    let payments = state.payments.clone();
    let refund = blocking(move || payments.refund(order_id, &requester, reason)).await?;
    Ok(HttpResponse::Created().json(RefundResponse::from(refund)))
}

/// GET /payments/history
#[utoipa::path(
    get,
    path = "/payments/history",
    responses((status = 200, description = "Orders with a settled payment", body = Vec<OrderResponse>)),
    tag = "payments",
    security(("bearer_auth" = []))
)]
pub async fn payment_history(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
) -> Result<HttpResponse, AppError> {
    let orders = state.orders.clone();
    let history = blocking(move || orders.payment_history(&requester)).await?;
    let body: Vec<OrderResponse> = history.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /payments/{id}
#[utoipa::path(
    get,
    path = "/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment transaction ID")),
    responses(
        (status = 200, description = "Payment transaction", body = TransactionResponse),
        (status = 404, description = "No such transaction for this caller"),
    ),
    tag = "payments",
    security(("bearer_auth" = []))
)]
pub async fn get_payment(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let transaction_id = path.into_inner();
    let payments = state.payments.clone();
    let tx = blocking(move || payments.get_transaction(transaction_id, &requester)).await?;
    Ok(HttpResponse::Ok().json(TransactionResponse::from(tx)))
}

/// PUT /admin/refunds/{id}
#[utoipa::path(
    put,
    path = "/admin/refunds/{id}",
    params(("id" = Uuid, Path, description = "Refund ID")),
    request_body = ResolveRefundRequest,
    responses(
        (status = 200, description = "Refund resolved", body = RefundResponse),
        (status = 400, description = "Refund already resolved"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_resolve_refund(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<Uuid>,
    body: web::Json<ResolveRefundRequest>,
) -> Result<HttpResponse, AppError> {
    let refund_id = path.into_inner();
    let outcome = body.into_inner().outcome;
    log::info!("admin {} resolves refund {} as {:?}", admin.id, refund_id, outcome);
    let payments = state.payments.clone();
    let refund = blocking(move || payments.resolve_refund(refund_id, outcome)).await?;
    Ok(HttpResponse::Ok().json(RefundResponse::from(refund)))
}
