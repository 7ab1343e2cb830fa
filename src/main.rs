use std::sync::Arc;

use storefront::application::cart_service::CartService;
use storefront::application::coupon_service::CouponService;
use storefront::application::order_service::OrderService;
use storefront::application::payment_service::PaymentService;
use storefront::config::AppConfig;
use storefront::domain::ports::Notifier;
use storefront::infrastructure::auth::JwtVerifier;
use storefront::infrastructure::cart_repo::DieselCartRepository;
use storefront::infrastructure::catalog_repo::DieselCatalog;
use storefront::infrastructure::coupon_repo::DieselCouponRepository;
use storefront::infrastructure::notifier::{LogNotifier, SendGridNotifier};
use storefront::infrastructure::order_repo::DieselOrderRepository;
use storefront::infrastructure::payment_repo::DieselPaymentRepository;
use storefront::infrastructure::stripe::{StripeConfig, StripeGateway};
use storefront::{build_server, create_pool, run_migrations, AppState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// Blocking HTTP clients must be created outside the async runtime, so wiring
// happens before the actix system starts.
fn main() -> Result<(), BoxError> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env()?;
    let pool = create_pool(&config.database_url)?;
    run_migrations(&pool)?;

    let orders = Arc::new(DieselOrderRepository::new(pool.clone()));
    let payments = Arc::new(DieselPaymentRepository::new(pool.clone()));
    let carts = Arc::new(DieselCartRepository::new(pool.clone()));
    let catalog = Arc::new(DieselCatalog::new(pool.clone()));
    let coupons = Arc::new(CouponService::new(Arc::new(DieselCouponRepository::new(pool))));

    let notifier: Arc<dyn Notifier> = match &config.sendgrid_api_key {
        Some(key) => Arc::new(SendGridNotifier::new(
            key.clone(),
            config.email_from.clone(),
            config.http_timeout,
        )?),
        None => {
            log::warn!("SENDGRID_API_KEY not set, emails will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let gateway = Arc::new(StripeGateway::new(StripeConfig {
        secret_key: config.stripe_secret_key.clone(),
        webhook_secret: config.stripe_webhook_secret.clone(),
        api_base: config.stripe_api_base.clone(),
        tolerance_secs: config.webhook_tolerance_secs,
        timeout: config.http_timeout,
    })?);

    let state = AppState {
        orders: Arc::new(
            OrderService::new(
                orders.clone(),
                catalog.clone(),
                carts.clone(),
                catalog.clone(),
                coupons.clone(),
                notifier.clone(),
            )
            .with_shipping_fee(config.shipping_fee.clone()),
        ),
        payments: Arc::new(PaymentService::new(
            orders,
            payments,
            gateway,
            catalog.clone(),
            coupons.clone(),
            notifier,
            config.payment_currency.clone(),
        )),
        carts: Arc::new(CartService::new(carts, catalog)),
        coupons,
        tokens: Arc::new(JwtVerifier::new(&config.jwt_secret)),
        public_base_url: config.public_base_url.clone(),
    };

    log::info!("Starting server at http://{}:{}", config.host, config.port);

    actix_web::rt::System::new().block_on(async move {
        build_server(state, &config.host, config.port)?.await
    })?;
    Ok(())
}
