use std::env;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::{BigDecimal, Zero};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable '{0}'")]
    Missing(&'static str),
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Empty when payments are not configured; checkout calls then fail with 503.
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub payment_currency: String,
    pub webhook_tolerance_secs: i64,
    /// No key means mail is only logged.
    pub sendgrid_api_key: Option<String>,
    pub email_from: String,
    pub public_base_url: String,
    pub http_timeout: Duration,
    pub shipping_fee: BigDecimal,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));
        fn parsed<T: FromStr>(
            name: &'static str,
            raw: Option<String>,
            default: T,
        ) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            match raw {
                None => Ok(default),
                Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                }),
            }
        }

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parsed("PORT", get("PORT"), 8080u16)?;
        let config = Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            stripe_secret_key: get("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: get("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            stripe_api_base: get("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            payment_currency: get("PAYMENT_CURRENCY")
                .unwrap_or_else(|| "inr".to_string())
                .to_lowercase(),
            webhook_tolerance_secs: parsed("WEBHOOK_TOLERANCE_SECS", get("WEBHOOK_TOLERANCE_SECS"), 300)?,
            sendgrid_api_key: get("SENDGRID_API_KEY"),
            email_from: get("EMAIL_FROM").unwrap_or_else(|| "orders@example.com".to_string()),
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            http_timeout: Duration::from_secs(parsed(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                10u64,
            )?),
            shipping_fee: parsed("SHIPPING_FEE", get("SHIPPING_FEE"), BigDecimal::zero())?,
            host,
            port,
        };
        if config.shipping_fee < BigDecimal::zero() {
            return Err(ConfigError::Invalid {
                name: "SHIPPING_FEE",
                reason: "must not be negative".into(),
            });
        }
        if config.stripe_secret_key.is_empty() {
            log::warn!("STRIPE_SECRET_KEY not set, checkout sessions will be unavailable");
        }
        Ok(config)
    }
}
