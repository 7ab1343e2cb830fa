use std::time::Duration;

use bigdecimal::BigDecimal;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{LineItem, OrderStatus};
use crate::domain::ports::Notifier;

/// A rendered customer email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Message {
    pub fn order_confirmation(to: &str, order_id: Uuid, total: &BigDecimal, items: &[LineItem]) -> Self {
        let rows: String = items
            .iter()
            .map(|i| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    i.name,
                    i.quantity,
                    i.line_total()
                )
            })
            .collect();
        Self {
            to: to.to_string(),
            subject: format!("Order confirmed #{}", short_id(order_id)),
            html: format!(
                "<h2>Thank you for your order!</h2>\
                 <p>Order <strong>#{}</strong></p>\
                 <table>{rows}</table>\
                 <p>Total: <strong>{total}</strong></p>",
                short_id(order_id)
            ),
        }
    }

    pub fn status_update(to: &str, order_id: Uuid, status: OrderStatus) -> Self {
        let blurb = match status {
            OrderStatus::Pending => "We have received your order.",
            OrderStatus::Confirmed => "Your payment went through and your order is confirmed.",
            OrderStatus::Shipped => "Your order is on its way.",
            OrderStatus::Delivered => "Your order has been delivered.",
            OrderStatus::Cancelled => "Your order has been cancelled.",
            OrderStatus::Returned => "We have received your return.",
        };
        Self {
            to: to.to_string(),
            subject: format!("Order #{} is now {}", short_id(order_id), status),
            html: format!("<p>{blurb}</p><p>Order <strong>#{}</strong></p>", short_id(order_id)),
        }
    }

    pub fn password_reset(to: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            html: format!(
                "<p>Someone asked to reset your password.</p>\
                 <p><a href=\"{link}\">Choose a new password</a></p>\
                 <p>If this wasn't you, ignore this email.</p>"
            ),
        }
    }

    pub fn refund_processed(to: &str, order_id: Uuid, amount: &BigDecimal) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Refund processed for order #{}", short_id(order_id)),
            html: format!(
                "<p>We refunded <strong>{amount}</strong> for order #{}.</p>",
                short_id(order_id)
            ),
        }
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_uppercase()
}

/// Anything that can deliver a rendered message.
pub trait Mailer: Send + Sync + 'static {
    fn deliver(&self, message: Message) -> Result<(), DomainError>;
}

impl<M: Mailer> Notifier for M {
    fn order_confirmation(
        &self,
        email: &str,
        order_id: Uuid,
        total: &BigDecimal,
        items: &[LineItem],
    ) -> Result<(), DomainError> {
        self.deliver(Message::order_confirmation(email, order_id, total, items))
    }

    fn order_status_update(
        &self,
        email: &str,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        self.deliver(Message::status_update(email, order_id, status))
    }

    fn password_reset(&self, email: &str, link: &str) -> Result<(), DomainError> {
        self.deliver(Message::password_reset(email, link))
    }

    fn refund_processed(
        &self,
        email: &str,
        order_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<(), DomainError> {
        self.deliver(Message::refund_processed(email, order_id, amount))
    }
}

pub struct SendGridNotifier {
    client: Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl SendGridNotifier {
    pub const ENDPOINT: &'static str = "https://api.sendgrid.com/v3/mail/send";

    pub fn new(api_key: String, from: String, timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            from,
            endpoint: Self::ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn body(&self, message: &Message) -> Value {
        json!({
            "personalizations": [{"to": [{"email": message.to}]}],
            "from": {"email": self.from},
            "subject": message.subject,
            "content": [{"type": "text/html", "value": message.html}],
        })
    }
}

impl Mailer for SendGridNotifier {
    fn deliver(&self, message: Message) -> Result<(), DomainError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(&message))
            .send()
            .map_err(|e| DomainError::Unavailable(format!("mail relay unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(DomainError::Unavailable(format!(
                "mail relay returned {}",
                response.status()
            )));
        }
        log::info!("sent \"{}\" to {}", message.subject, message.to);
        Ok(())
    }
}

/// Used when no mail relay is configured.
pub struct LogNotifier;

impl Mailer for LogNotifier {
    fn deliver(&self, message: Message) -> Result<(), DomainError> {
        log::info!("email to {}: {}", message.to, message.subject);
        log::debug!("{}", message.html);
        Ok(())
    }
}
