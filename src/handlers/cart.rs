use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{blocking, Authenticated, MaybeAuthenticated};
use crate::domain::cart::{CartItem, CartLine, CartScope, CartValidation, CartView, StockCheck};
use crate::domain::requester::Requester;
use crate::errors::AppError;
use crate::AppState;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, IntoParams)]
pub struct CartQuery {
    /// Guest cart key; ignored when a bearer token is sent.
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    pub session_id: Option<String>,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeCartRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    #[schema(value_type = String)]
    pub price: BigDecimal,
    pub image_url: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub line_total: BigDecimal,
}

impl From<CartLine> for CartLineResponse {
    fn from(l: CartLine) -> Self {
        Self {
            id: l.item_id,
            product_id: l.product_id,
            name: l.name,
            price: l.unit_price,
            image_url: l.image_url,
            quantity: l.quantity,
            line_total: l.line_total,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartResponse {
    pub items: Vec<CartLineResponse>,
    #[schema(value_type = String)]
    pub total: BigDecimal,
    pub item_count: usize,
}

impl From<CartView> for CartResponse {
    fn from(v: CartView) -> Self {
        Self {
            items: v.items.into_iter().map(Into::into).collect(),
            total: v.total,
            item_count: v.item_count,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

impl From<CartItem> for CartItemResponse {
    fn from(i: CartItem) -> Self {
        Self {
            id: i.id,
            product_id: i.product_id,
            quantity: i.quantity,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockCheckResponse {
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub requested_quantity: i32,
    pub available_stock: Option<i32>,
    pub valid: bool,
    pub reason: String,
}

impl From<StockCheck> for StockCheckResponse {
    fn from(c: StockCheck) -> Self {
        Self {
            product_id: c.product_id,
            product_name: c.product_name,
            requested_quantity: c.requested_quantity,
            available_stock: c.available_stock,
            valid: c.valid,
            reason: c.reason,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartValidationResponse {
    pub valid: bool,
    pub items: Vec<StockCheckResponse>,
    pub message: String,
}

impl From<CartValidation> for CartValidationResponse {
    fn from(v: CartValidation) -> Self {
        Self {
            valid: v.valid,
            items: v.items.into_iter().map(Into::into).collect(),
            message: v.message,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: usize,
}

/// Signed-in callers use their user cart; guests must name a session.
fn resolve_scope(
    requester: Option<&Requester>,
    session_id: Option<String>,
) -> Result<CartScope, AppError> {
    if let Some(r) = requester {
        return Ok(CartScope::User(r.id));
    }
    session_id
        .filter(|s| !s.trim().is_empty())
        .map(CartScope::Session)
        .ok_or_else(|| AppError::BadRequest("session_id is required for guest carts".into()))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /cart
#[utoipa::path(
    get,
    path = "/cart",
    params(CartQuery),
    responses(
        (status = 200, description = "Cart with live prices", body = CartResponse),
        (status = 400, description = "Neither token nor session_id given"),
    ),
    tag = "cart"
)]
pub async fn get_cart(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    query: web::Query<CartQuery>,
) -> Result<HttpResponse, AppError> {
    let scope = resolve_scope(caller.0.as_ref(), query.into_inner().session_id)?;
    let carts = state.carts.clone();
    let cart = blocking(move || carts.get_cart(&scope)).await?;
    Ok(HttpResponse::Ok().json(CartResponse::from(cart)))
}

/// POST /cart
///
/// Adds to the existing row when the product is already in the cart.
#[utoipa::path(
    post,
    path = "/cart",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added", body = CartItemResponse),
        (status = 404, description = "Unknown product"),
    ),
    tag = "cart"
)]
pub async fn add_item(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    body: web::Json<AddItemRequest>,
) -> Result<HttpResponse, AppError> {
    let AddItemRequest {
        product_id,
        quantity,
        session_id,
    } = body.into_inner();
    let scope = resolve_scope(caller.0.as_ref(), session_id)?;
    let carts = state.carts.clone();
    let item = blocking(move || carts.add_item(&scope, product_id, quantity)).await?;
    Ok(HttpResponse::Ok().json(CartItemResponse::from(item)))
}

/// PUT /cart/{item_id}
#[utoipa::path(
    put,
    path = "/cart/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart item ID"), CartQuery),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Quantity replaced", body = CartItemResponse),
        (status = 404, description = "Item not in this cart"),
    ),
    tag = "cart"
)]
pub async fn update_item(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    path: web::Path<Uuid>,
    query: web::Query<CartQuery>,
    body: web::Json<UpdateQuantityRequest>,
) -> Result<HttpResponse, AppError> {
    let scope = resolve_scope(caller.0.as_ref(), query.into_inner().session_id)?;
    let item_id = path.into_inner();
    let quantity = body.into_inner().quantity;
    let carts = state.carts.clone();
    let item = blocking(move || carts.update_quantity(&scope, item_id, quantity)).await?;
    Ok(HttpResponse::Ok().json(CartItemResponse::from(item)))
}

/// DELETE /cart/{item_id}
#[utoipa::path(
    delete,
    path = "/cart/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart item ID"), CartQuery),
    responses(
        (status = 204, description = "Item removed"),
        (status = 404, description = "Item not in this cart"),
    ),
    tag = "cart"
)]
pub async fn remove_item(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    path: web::Path<Uuid>,
    query: web::Query<CartQuery>,
) -> Result<HttpResponse, AppError> {
    let scope = resolve_scope(caller.0.as_ref(), query.into_inner().session_id)?;
    let item_id = path.into_inner();
    let carts = state.carts.clone();
    blocking(move || carts.remove_item(&scope, item_id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /cart
#[utoipa::path(
    delete,
    path = "/cart",
    params(CartQuery),
    responses((status = 200, description = "Rows removed", body = CountResponse)),
    tag = "cart"
)]
pub async fn clear_cart(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    query: web::Query<CartQuery>,
) -> Result<HttpResponse, AppError> {
    let scope = resolve_scope(caller.0.as_ref(), query.into_inner().session_id)?;
    let carts = state.carts.clone();
    let count = blocking(move || carts.clear(&scope)).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}

/// POST /cart/validate
#[utoipa::path(
    post,
    path = "/cart/validate",
    responses((status = 200, description = "Per-item stock report", body = CartValidationResponse)),
    tag = "cart",
    security(("bearer_auth" = []))
)]
pub async fn validate_cart(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
) -> Result<HttpResponse, AppError> {
    let carts = state.carts.clone();
    let report = blocking(move || carts.validate(requester.id)).await?;
    Ok(HttpResponse::Ok().json(CartValidationResponse::from(report)))
}

/// POST /cart/merge
///
/// Moves a guest cart into the caller's cart after login.
#[utoipa::path(
    post,
    path = "/cart/merge",
    request_body = MergeCartRequest,
    responses((status = 200, description = "Rows merged", body = CountResponse)),
    tag = "cart",
    security(("bearer_auth" = []))
)]
pub async fn merge_cart(
    state: web::Data<AppState>,
    Authenticated(requester): Authenticated,
    body: web::Json<MergeCartRequest>,
) -> Result<HttpResponse, AppError> {
    let session_id = body.into_inner().session_id;
    if session_id.trim().is_empty() {
        return Err(AppError::BadRequest("session_id must not be empty".into()));
    }
    let carts = state.carts.clone();
    let count = blocking(move || carts.merge_guest_cart(requester.id, &session_id)).await?;
    Ok(HttpResponse::Ok().json(CountResponse { count }))
}
