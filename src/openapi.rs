use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{cart, coupons, orders, payments};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = "Cart, checkout, order tracking, coupons and payment reconciliation.\n\n\
            Authenticated endpoints expect `Authorization: Bearer <jwt>`."
    ),
    tags(
        (name = "orders", description = "Order placement and tracking"),
        (name = "payments", description = "Checkout sessions, webhooks, retries and refunds"),
        (name = "cart", description = "Guest and user carts"),
        (name = "coupons", description = "Coupon validation"),
        (name = "admin", description = "Administrative endpoints")
    ),
    modifiers(&BearerAuth),
    paths(
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order,
        orders::cancel_order,
        orders::order_timeline,
        orders::track_order,
        orders::admin_list_orders,
        orders::admin_export_orders,
        orders::admin_set_status,
        payments::create_checkout_session,
        payments::session_status,
        payments::payment_webhook,
        payments::retry_payment,
        payments::request_refund,
        payments::payment_history,
        payments::get_payment,
        payments::admin_resolve_refund,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        cart::validate_cart,
        cart::merge_cart,
        coupons::validate_coupon,
        coupons::active_coupons,
        coupons::admin_create_coupon,
        coupons::admin_get_coupon,
        coupons::admin_update_coupon,
        coupons::admin_deactivate_coupon,
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi())
}
