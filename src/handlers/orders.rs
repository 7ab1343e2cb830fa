use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{blocking, Admin, Authenticated, GuestSession, MaybeAuthenticated, Party};
use crate::domain::export::{orders_csv, CreatedWindow, ExportFormat};
use crate::domain::money::round_money;
use crate::domain::order::{
    LineItem, NewOrder, Order, OrderLineInput, OrderPatch, OrderStatus, PaymentStatus,
    RefundStatus, ShippingAddress, TimelineEntry, TrackingView,
};
use crate::errors::AppError;
use crate::AppState;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<CreateOrderLineRequest>,
    /// Total shown to the shopper, e.g. "1000.00". Rejected if it differs from the computed total.
    #[schema(value_type = Option<String>)]
    pub total_amount: Option<BigDecimal>,
    /// Cart session. Required for guests, who later present it to reach the order;
    /// the cart is cleared once the order is placed.
    pub session_id: Option<String>,
    pub customer_email: Option<String>,
    pub coupon_code: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
}

impl From<CreateOrderRequest> for NewOrder {
    fn from(body: CreateOrderRequest) -> Self {
        NewOrder {
            items: body
                .items
                .into_iter()
                .map(|l| OrderLineInput {
                    product_id: l.product_id,
                    quantity: l.quantity,
                })
                .collect(),
            declared_total: body.total_amount,
            cart_session_id: body.session_id,
            customer_email: body.customer_email,
            coupon_code: body.coupon_code,
            shipping_address: body.shipping_address,
            notes: body.notes,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub name: String,
    #[schema(value_type = String)]
    pub unit_price: BigDecimal,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub line_total: BigDecimal,
}

impl From<LineItem> for OrderLineResponse {
    fn from(item: LineItem) -> Self {
        let line_total = round_money(&item.line_total());
        Self {
            product_id: item.product_id,
            name: item.name,
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineEntryResponse {
    #[schema(value_type = String)]
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

impl From<TimelineEntry> for TimelineEntryResponse {
    fn from(entry: TimelineEntry) -> Self {
        Self {
            status: entry.status,
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub items: Vec<OrderLineResponse>,
    #[schema(value_type = String)]
    pub subtotal: BigDecimal,
    #[schema(value_type = String)]
    pub discount: BigDecimal,
    #[schema(value_type = String)]
    pub shipping: BigDecimal,
    #[schema(value_type = String)]
    pub total: BigDecimal,
    pub coupon_code: Option<String>,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub payment_status: PaymentStatus,
    pub payment_session_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    #[schema(value_type = Option<String>)]
    pub refund_status: Option<RefundStatus>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntryResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            id: o.id,
            user_id: o.user_id,
            items: o.items.into_iter().map(Into::into).collect(),
            subtotal: o.subtotal,
            discount: o.discount,
            shipping: o.shipping,
            total: o.total,
            coupon_code: o.coupon_code,
            status: o.status,
            payment_status: o.payment_status,
            payment_session_id: o.payment_session_id,
            paid_at: o.paid_at,
            shipping_address: o.shipping_address,
            notes: o.notes,
            tracking_number: o.tracking_number,
            refund_status: o.refund_status,
            cancelled_at: o.cancelled_at,
            timeline: o.timeline.into_iter().map(Into::into).collect(),
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderRequest {
    #[schema(value_type = Option<String>)]
    pub status: Option<OrderStatus>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
}

impl From<UpdateOrderRequest> for OrderPatch {
    fn from(body: UpdateOrderRequest) -> Self {
        OrderPatch {
            status: body.status,
            shipping_address: body.shipping_address,
            notes: body.notes,
            tracking_number: body.tracking_number,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStatusRequest {
    #[schema(value_type = String)]
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineResponse {
    pub order_id: Uuid,
    #[schema(value_type = String)]
    pub current_status: OrderStatus,
    pub timeline: Vec<TimelineEntryResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackingResponse {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub total: BigDecimal,
    pub tracking_number: Option<String>,
    pub items: Vec<OrderLineResponse>,
    pub timeline: Vec<TimelineEntryResponse>,
    pub created_at: DateTime<Utc>,
}

impl From<TrackingView> for TrackingResponse {
    fn from(v: TrackingView) -> Self {
        Self {
            id: v.id,
            status: v.status,
            total: v.total,
            tracking_number: v.tracking_number,
            items: v.items.into_iter().map(Into::into).collect(),
            timeline: v.timeline.into_iter().map(Into::into).collect(),
            created_at: v.created_at,
        }
    }
}

// ── Pagination ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersParams {
    /// Only orders in this status.
    #[param(value_type = Option<String>)]
    pub status: Option<OrderStatus>,
    /// Page number (1-based). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page. Defaults to 20, maximum 100.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListOrdersResponse {
    pub items: Vec<OrderResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ExportParams {
    /// `json` (default) or `csv`.
    #[serde(default)]
    #[param(value_type = Option<String>)]
    pub format: ExportFormat,
    /// Earliest creation time, RFC 3339 or `YYYY-MM-DD`.
    pub start_date: Option<String>,
    /// Latest creation time, RFC 3339 or `YYYY-MM-DD` (whole day).
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderExportResponse {
    /// Always `json`.
    pub format: String,
    pub count: usize,
    pub orders: Vec<OrderResponse>,
    pub exported_at: DateTime<Utc>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders
///
/// Places an order from catalog prices. Guests may order without a token;
/// their cart is identified by `session_id`.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse),
        (status = 400, description = "Invalid items, coupon, declared total or missing guest session"),
        (status = 404, description = "Unknown product"),
        (status = 503, description = "Insufficient stock"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let input = NewOrder::from(body.into_inner());
    let orders = state.orders.clone();
    let id = blocking(move || orders.create_order(caller.0.as_ref(), input)).await?;
    Ok(HttpResponse::Created().json(CreateOrderResponse { id }))
}

/// GET /orders
#[utoipa::path(
    get,
    path = "/orders",
    responses(
        (status = 200, description = "The caller's orders, newest first", body = Vec<OrderResponse>),
        (status = 401, description = "Missing or invalid token"),
    ),
    tag = "orders",
    security(("bearer_auth" = []))
)]
pub async fn list_orders(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
) -> Result<HttpResponse, AppError> {
    let orders = state.orders.clone();
    let list = blocking(move || orders.list_for_user(&requester)).await?;
    let body: Vec<OrderResponse> = list.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /orders/{id}
///
/// Guests identify themselves with the cart `session_id` the order was placed from.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID"), GuestSession),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 401, description = "Neither a token nor a session_id"),
        (status = 403, description = "Order belongs to another customer"),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders",
    security((), ("bearer_auth" = []))
)]
pub async fn get_order(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    path: web::Path<Uuid>,
    guest: web::Query<GuestSession>,
) -> Result<HttpResponse, AppError> {
    let party = Party::resolve(caller.0, guest.into_inner().session_id)?;
    let order_id = path.into_inner();
    let orders = state.orders.clone();
    let order = blocking(move || orders.get_order(order_id, party.as_caller())).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// PATCH /orders/{id}
///
/// Customers may change `shipping_address` and `notes`; admins any field.
#[utoipa::path(
    patch,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = OrderResponse),
        (status = 400, description = "Status change not allowed"),
        (status = 403, description = "Field or order not editable by the caller"),
        (status = 409, description = "Order changed concurrently"),
    ),
    tag = "orders",
    security(("bearer_auth" = []))
)]
pub async fn update_order(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    path: web::Path<Uuid>,
    body: web::Json<UpdateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let patch = OrderPatch::from(body.into_inner());
    let orders = state.orders.clone();
    let order = blocking(move || orders.update_order(order_id, patch, &requester)).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// POST /orders/{id}/cancel
#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID"), GuestSession),
    responses(
        (status = 200, description = "Order cancelled", body = OrderResponse),
        (status = 400, description = "Order can no longer be cancelled"),
        (status = 401, description = "Neither a token nor a session_id"),
        (status = 403, description = "Order belongs to another customer"),
    ),
    tag = "orders",
    security((), ("bearer_auth" = []))
)]
pub async fn cancel_order(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    path: web::Path<Uuid>,
    guest: web::Query<GuestSession>,
) -> Result<HttpResponse, AppError> {
    let party = Party::resolve(caller.0, guest.into_inner().session_id)?;
    let order_id = path.into_inner();
    let orders = state.orders.clone();
    let order = blocking(move || orders.cancel_order(order_id, party.as_caller())).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// GET /orders/{id}/timeline
#[utoipa::path(
    get,
    path = "/orders/{id}/timeline",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses((status = 200, description = "Status history", body = TimelineResponse)),
    tag = "orders",
    security(("bearer_auth" = []))
)]
pub async fn order_timeline(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let orders = state.orders.clone();
    let (current_status, timeline) =
        blocking(move || orders.timeline(order_id, &requester)).await?;
    Ok(HttpResponse::Ok().json(TimelineResponse {
        order_id,
        current_status,
        timeline: timeline.into_iter().map(Into::into).collect(),
    }))
}

/// GET /track/{id}
///
/// Public; returns a reduced view without customer details.
#[utoipa::path(
    get,
    path = "/track/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Tracking view", body = TrackingResponse),
        (status = 404, description = "Order not found"),
    ),
    tag = "orders"
)]
pub async fn track_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let orders = state.orders.clone();
    let view = blocking(move || orders.track(order_id)).await?;
    Ok(HttpResponse::Ok().json(TrackingResponse::from(view)))
}

/// GET /admin/orders
#[utoipa::path(
    get,
    path = "/admin/orders",
    params(ListOrdersParams),
    responses(
        (status = 200, description = "Paginated orders", body = ListOrdersResponse),
        (status = 403, description = "Caller is not an admin"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_list_orders(
    state: web::Data<AppState>,
    _admin: Admin,
    query: web::Query<ListOrdersParams>,
) -> Result<HttpResponse, AppError> {
    let ListOrdersParams {
        status,
        page,
        limit,
    } = query.into_inner();
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let orders = state.orders.clone();
    let result = blocking(move || orders.list_all(status, page, limit)).await?;
    Ok(HttpResponse::Ok().json(ListOrdersResponse {
        items: result.items.into_iter().map(Into::into).collect(),
        total: result.total,
        page,
        limit,
    }))
}

/// GET /admin/orders/export
///
/// Every order in the date range, newest first, as JSON or as a CSV download.
#[utoipa::path(
    get,
    path = "/admin/orders/export",
    params(ExportParams),
    responses(
        (status = 200, description = "Orders as JSON; with `format=csv` a `text/csv` attachment instead", body = OrderExportResponse),
        (status = 400, description = "Unknown format or unparseable date"),
        (status = 403, description = "Caller is not an admin"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_export_orders(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    query: web::Query<ExportParams>,
) -> Result<HttpResponse, AppError> {
    let ExportParams {
        format,
        start_date,
        end_date,
    } = query.into_inner();
    let window = CreatedWindow::parse(start_date.as_deref(), end_date.as_deref())?;
    log::info!("admin {} exports orders as {:?}", admin.id, format);
    let orders = state.orders.clone();
    let exported = blocking(move || orders.export(window)).await?;
    let now = Utc::now();

    Ok(match format {
        ExportFormat::Csv => HttpResponse::Ok()
            .content_type("text/csv")
            .insert_header((
                "Content-Disposition",
                format!(
                    "attachment; filename=\"orders_{}.csv\"",
                    now.timestamp_millis()
                ),
            ))
            .body(orders_csv(&exported)),
        ExportFormat::Json => HttpResponse::Ok().json(OrderExportResponse {
            format: "json".into(),
            count: exported.len(),
            orders: exported.into_iter().map(Into::into).collect(),
            exported_at: now,
        }),
    })
}

/// PUT /admin/orders/{id}/status
#[utoipa::path(
    put,
    path = "/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = SetStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = OrderResponse),
        (status = 400, description = "Transition not allowed"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_set_status(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<Uuid>,
    body: web::Json<SetStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let status = body.into_inner().status;
    log::info!("admin {} sets order {} to {}", admin.id, order_id, status);
    let orders = state.orders.clone();
    let order = blocking(move || orders.set_status(order_id, status)).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}
