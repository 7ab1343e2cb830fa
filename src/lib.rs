pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod infrastructure;
pub mod openapi;
pub mod schema;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use application::cart_service::CartService;
use application::coupon_service::CouponService;
use application::order_service::OrderService;
use application::payment_service::PaymentService;
use domain::ports::TokenVerifier;

pub use db::{create_pool, DbPool};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if !applied.is_empty() {
        log::info!("applied {} migrations", applied.len());
    }
    Ok(())
}

/// Services shared by every worker.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub tokens: Arc<dyn TokenVerifier>,
    /// Base for checkout redirect URLs, without a trailing slash.
    pub public_base_url: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use handlers::{cart, coupons, orders, payments};

    cfg.service(
        web::scope("/orders")
            .route("", web::post().to(orders::create_order))
            .route("", web::get().to(orders::list_orders))
            .route("/{id}", web::get().to(orders::get_order))
            .route("/{id}", web::patch().to(orders::update_order))
            .route("/{id}/cancel", web::post().to(orders::cancel_order))
            .route("/{id}/timeline", web::get().to(orders::order_timeline)),
    )
    .route("/track/{id}", web::get().to(orders::track_order))
    .service(
        web::scope("/checkout")
            .route("/session", web::post().to(payments::create_checkout_session))
            .route("/status/{session_id}", web::get().to(payments::session_status)),
    )
    .service(
        web::scope("/payments")
            .route("/webhook", web::post().to(payments::payment_webhook))
            .route("/retry", web::post().to(payments::retry_payment))
            .route("/refund", web::post().to(payments::request_refund))
            .route("/history", web::get().to(payments::payment_history))
            .route("/{id}", web::get().to(payments::get_payment)),
    )
    .service(
        web::scope("/cart")
            .route("", web::get().to(cart::get_cart))
            .route("", web::post().to(cart::add_item))
            .route("", web::delete().to(cart::clear_cart))
            .route("/validate", web::post().to(cart::validate_cart))
            .route("/merge", web::post().to(cart::merge_cart))
            .route("/{item_id}", web::put().to(cart::update_item))
            .route("/{item_id}", web::delete().to(cart::remove_item)),
    )
    .service(
        web::scope("/coupons")
            .route("/validate", web::post().to(coupons::validate_coupon))
            .route("/active", web::get().to(coupons::active_coupons)),
    )
    .service(
        web::scope("/admin")
            .route("/orders", web::get().to(orders::admin_list_orders))
            .route("/orders/export", web::get().to(orders::admin_export_orders))
            .route("/orders/{id}/status", web::put().to(orders::admin_set_status))
            .route("/refunds/{id}", web::put().to(payments::admin_resolve_refund))
            .route("/coupons", web::post().to(coupons::admin_create_coupon))
            .route("/coupons/{code}", web::get().to(coupons::admin_get_coupon))
            .route("/coupons/{code}", web::put().to(coupons::admin_update_coupon))
            .route("/coupons/{code}", web::delete().to(coupons::admin_deactivate_coupon)),
    );
}

/// Build and return an actix-web `Server` bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or spawning) the returned server.
pub fn build_server(
    state: AppState,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    let state = web::Data::new(state);
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(configure_routes)
            .service(openapi::swagger_ui())
    })
    .bind((host.to_string(), port))?
    .run())
}
