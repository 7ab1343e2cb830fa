use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{blocking, Admin, MaybeAuthenticated};
use crate::domain::coupon::{Coupon, CouponPatch, CouponQuote, DiscountType, NewCoupon};
use crate::errors::AppError;
use crate::AppState;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateCouponRequest {
    pub code: String,
    #[schema(value_type = String)]
    pub order_value: BigDecimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponQuoteResponse {
    pub valid: bool,
    pub code: String,
    #[schema(value_type = String)]
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub discount_amount: BigDecimal,
    #[schema(value_type = String)]
    pub final_amount: BigDecimal,
    pub free_shipping: bool,
}

impl From<CouponQuote> for CouponQuoteResponse {
    fn from(q: CouponQuote) -> Self {
        Self {
            valid: true,
            code: q.code,
            discount_type: q.discount_type,
            discount_amount: q.discount_amount,
            final_amount: q.final_amount,
            free_shipping: q.free_shipping,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCouponRequest {
    pub code: String,
    #[schema(value_type = String)]
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub value: BigDecimal,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub min_order_value: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub max_discount: Option<BigDecimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: DateTime<Utc>,
    pub usage_limit: Option<i32>,
    #[serde(default = "default_per_user_limit")]
    pub per_user_limit: i32,
}

fn default_per_user_limit() -> i32 {
    1
}

impl From<CreateCouponRequest> for NewCoupon {
    fn from(body: CreateCouponRequest) -> Self {
        NewCoupon {
            code: body.code,
            discount_type: body.discount_type,
            value: body.value,
            min_order_value: body.min_order_value.unwrap_or_default(),
            max_discount: body.max_discount,
            valid_from: body.valid_from.unwrap_or_else(Utc::now),
            valid_until: body.valid_until,
            usage_limit: body.usage_limit,
            per_user_limit: body.per_user_limit,
        }
    }
}

/// Fields to change; the rest stay as they are. The code cannot be renamed.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCouponRequest {
    #[schema(value_type = Option<String>)]
    pub discount_type: Option<DiscountType>,
    #[schema(value_type = Option<String>)]
    pub value: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub min_order_value: Option<BigDecimal>,
    #[schema(value_type = Option<String>)]
    pub max_discount: Option<BigDecimal>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
}

impl From<UpdateCouponRequest> for CouponPatch {
    fn from(body: UpdateCouponRequest) -> Self {
        CouponPatch {
            discount_type: body.discount_type,
            value: body.value,
            min_order_value: body.min_order_value,
            max_discount: body.max_discount,
            valid_from: body.valid_from,
            valid_until: body.valid_until,
            is_active: body.is_active,
            usage_limit: body.usage_limit,
            per_user_limit: body.per_user_limit,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CouponResponse {
    pub code: String,
    #[schema(value_type = String)]
    pub discount_type: DiscountType,
    #[schema(value_type = String)]
    pub value: BigDecimal,
    #[schema(value_type = String)]
    pub min_order_value: BigDecimal,
    #[schema(value_type = Option<String>)]
    pub max_discount: Option<BigDecimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub per_user_limit: i32,
}

impl From<Coupon> for CouponResponse {
    fn from(c: Coupon) -> Self {
        Self {
            code: c.code,
            discount_type: c.discount_type,
            value: c.value,
            min_order_value: c.min_order_value,
            max_discount: c.max_discount,
            valid_from: c.valid_from,
            valid_until: c.valid_until,
            is_active: c.is_active,
            usage_limit: c.usage_limit,
            usage_count: c.usage_count,
            per_user_limit: c.per_user_limit,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /coupons/validate
///
/// Prices a code against an order value without consuming it. Signed-in
/// callers also get their per-user limit checked.
#[utoipa::path(
    post,
    path = "/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon applies", body = CouponQuoteResponse),
        (status = 400, description = "Coupon rejected; the error names the reason"),
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    state: web::Data<AppState>,
    caller: MaybeAuthenticated,
    body: web::Json<ValidateCouponRequest>,
) -> Result<HttpResponse, AppError> {
    let ValidateCouponRequest { code, order_value } = body.into_inner();
    let user_id = caller.0.map(|r| r.id);
    let coupons = state.coupons.clone();
    let quote = blocking(move || coupons.validate(&code, &order_value, user_id)).await?;
    Ok(HttpResponse::Ok().json(CouponQuoteResponse::from(quote)))
}

/// GET /coupons/active
#[utoipa::path(
    get,
    path = "/coupons/active",
    responses((status = 200, description = "Coupons usable right now", body = Vec<CouponResponse>)),
    tag = "coupons"
)]
pub async fn active_coupons(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let coupons = state.coupons.clone();
    let list = blocking(move || coupons.list_active()).await?;
    let body: Vec<CouponResponse> = list.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// POST /admin/coupons
#[utoipa::path(
    post,
    path = "/admin/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = CouponResponse),
        (status = 400, description = "Invalid coupon definition"),
        (status = 409, description = "Code already exists"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_create_coupon(
    state: web::Data<AppState>,
    _admin: Admin,
    body: web::Json<CreateCouponRequest>,
) -> Result<HttpResponse, AppError> {
    let input = NewCoupon::from(body.into_inner());
    let coupons = state.coupons.clone();
    let coupon = blocking(move || coupons.create(input)).await?;
    Ok(HttpResponse::Created().json(CouponResponse::from(coupon)))
}

/// GET /admin/coupons/{code}
#[utoipa::path(
    get,
    path = "/admin/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, any case")),
    responses(
        (status = 200, description = "Coupon found", body = CouponResponse),
        (status = 404, description = "Coupon not found"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_get_coupon(
    state: web::Data<AppState>,
    _admin: Admin,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let code = path.into_inner();
    let coupons = state.coupons.clone();
    let coupon = blocking(move || coupons.get(&code)).await?;
    Ok(HttpResponse::Ok().json(CouponResponse::from(coupon)))
}

/// PUT /admin/coupons/{code}
#[utoipa::path(
    put,
    path = "/admin/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, any case")),
    request_body = UpdateCouponRequest,
    responses(
        (status = 200, description = "Coupon updated", body = CouponResponse),
        (status = 400, description = "Edited coupon is not valid"),
        (status = 404, description = "Coupon not found"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_update_coupon(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<String>,
    body: web::Json<UpdateCouponRequest>,
) -> Result<HttpResponse, AppError> {
    let code = path.into_inner();
    let patch = CouponPatch::from(body.into_inner());
    log::info!("admin {} edits coupon {}", admin.id, code);
    let coupons = state.coupons.clone();
    let coupon = blocking(move || coupons.update(&code, patch)).await?;
    Ok(HttpResponse::Ok().json(CouponResponse::from(coupon)))
}

/// DELETE /admin/coupons/{code}
///
/// Deactivates the code. It is kept so past orders still resolve it.
#[utoipa::path(
    delete,
    path = "/admin/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, any case")),
    responses(
        (status = 200, description = "Coupon deactivated", body = CouponResponse),
        (status = 404, description = "Coupon not found"),
    ),
    tag = "admin",
    security(("bearer_auth" = []))
)]
pub async fn admin_deactivate_coupon(
    state: web::Data<AppState>,
    Admin(admin): Admin,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let code = path.into_inner();
    log::info!("admin {} deactivates coupon {}", admin.id, code);
    let coupons = state.coupons.clone();
    let coupon = blocking(move || coupons.deactivate(&code)).await?;
    Ok(HttpResponse::Ok().json(CouponResponse::from(coupon)))
}
