use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::payment::{
    CheckoutSession, PaymentEvent, PaymentEventKind, SessionRequest, SessionSnapshot,
    SessionState,
};
use crate::domain::ports::PaymentGateway;

type HmacSha256 = Hmac<Sha256>;

pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub tolerance_secs: i64,
    pub timeout: Duration,
}

pub struct StripeGateway {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
    tolerance_secs: i64,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            secret_key: config.secret_key,
            webhook_secret: config.webhook_secret,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tolerance_secs: config.tolerance_secs,
        })
    }

    fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T, DomainError> {
        if self.secret_key.is_empty() {
            return Err(DomainError::Unavailable("payments are not configured".into()));
        }
        let response = request
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .map_err(|e| DomainError::Unavailable(format!("payment processor unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::error!("payment processor returned {status}: {body}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                DomainError::Unavailable(format!("payment processor returned {status}"))
            } else {
                DomainError::Internal(format!("payment processor rejected request: {status}"))
            });
        }
        response
            .json()
            .map_err(|e| DomainError::Internal(format!("unreadable processor response: {e}")))
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    payment_intent: Option<Value>,
}

impl PaymentGateway for StripeGateway {
    fn create_session(&self, request: &SessionRequest) -> Result<CheckoutSession, DomainError> {
        let order_id = request.order_id.to_string();
        let mut form = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", order_id.clone()),
            ("metadata[order_id]", order_id.clone()),
            ("payment_intent_data[metadata][order_id]", order_id),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                request.description.clone(),
            ),
        ];
        if let Some(user_id) = request.user_id {
            form.push(("metadata[user_id]", user_id.to_string()));
        }

        let session: SessionResponse = self.send(
            self.client
                .post(format!("{}/v1/checkout/sessions", self.api_base))
                .form(&form),
        )?;
        let url = session.url.ok_or_else(|| {
            DomainError::Internal(format!("checkout session {} has no url", session.id))
        })?;
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    fn retrieve_session(&self, session_id: &str) -> Result<SessionSnapshot, DomainError> {
        let session: SessionResponse = self.send(
            self.client
                .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id)),
        )?;
        let state = if session.payment_status.as_deref() == Some("paid") {
            SessionState::Paid
        } else if session.status.as_deref() == Some("expired") {
            SessionState::Expired
        } else {
            SessionState::Open
        };
        Ok(SessionSnapshot {
            order_id: order_ref(session.metadata.as_ref(), session.client_reference_id.as_deref()),
            payment_intent_id: session.payment_intent.as_ref().and_then(object_id),
            id: session.id,
            state,
        })
    }

    fn parse_event(&self, payload: &[u8], signature: &str) -> Result<PaymentEvent, DomainError> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance_secs,
            chrono::Utc::now().timestamp(),
        )?;
        decode_event(payload)
    }
}

/// Checks a `t=<unix>,v1=<hex hmac>` header against `payload`. Any `v1` entry may
/// match, which lets the processor roll secrets.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), DomainError> {
    if secret.is_empty() {
        log::error!("webhook received but no signing secret is configured");
        return Err(DomainError::InvalidSignature);
    }
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        log::warn!("webhook signature header has no timestamp");
        return Err(DomainError::InvalidSignature);
    };
    if (now - timestamp).abs() > tolerance_secs {
        log::warn!("webhook timestamp {timestamp} outside tolerance");
        return Err(DomainError::InvalidSignature);
    }

    let expected = sign(payload, secret, timestamp)?;
    if candidates
        .iter()
        .any(|c| constant_time_eq(expected.as_bytes(), c.as_bytes()))
    {
        Ok(())
    } else {
        log::warn!("webhook signature mismatch");
        Err(DomainError::InvalidSignature)
    }
}

/// Builds the header value the processor would send for `payload` at `timestamp`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, DomainError> {
    Ok(format!("t={},v1={}", timestamp, sign(payload, secret, timestamp)?))
}

fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, DomainError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DomainError::Internal(format!("bad webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: Value,
}

/// Decodes an already-authenticated event body.
pub fn decode_event(payload: &[u8]) -> Result<PaymentEvent, DomainError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| DomainError::InvalidArgument(format!("malformed payment event: {e}")))?;
    let object = &raw.data.object;
    let metadata = object.get("metadata");
    let order_id = order_ref(
        metadata,
        object.get("client_reference_id").and_then(Value::as_str),
    );

    let event = match raw.kind.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => PaymentEvent {
            kind: PaymentEventKind::SessionCompleted,
            session_id: object.get("id").and_then(Value::as_str).map(str::to_string),
            payment_intent_id: object.get("payment_intent").and_then(object_id),
            order_id,
            id: raw.id,
        },
        "checkout.session.expired" => PaymentEvent {
            kind: PaymentEventKind::SessionExpired,
            session_id: object.get("id").and_then(Value::as_str).map(str::to_string),
            payment_intent_id: None,
            order_id,
            id: raw.id,
        },
        "checkout.session.async_payment_failed" => PaymentEvent {
            kind: PaymentEventKind::PaymentFailed,
            session_id: object.get("id").and_then(Value::as_str).map(str::to_string),
            payment_intent_id: object.get("payment_intent").and_then(object_id),
            order_id,
            id: raw.id,
        },
        "payment_intent.payment_failed" => PaymentEvent {
            kind: PaymentEventKind::PaymentFailed,
            session_id: None,
            payment_intent_id: object.get("id").and_then(Value::as_str).map(str::to_string),
            order_id,
            id: raw.id,
        },
        other => PaymentEvent {
            kind: PaymentEventKind::Other(other.to_string()),
            session_id: None,
            payment_intent_id: None,
            order_id,
            id: raw.id,
        },
    };
    Ok(event)
}

fn order_ref(metadata: Option<&Value>, client_reference: Option<&str>) -> Option<Uuid> {
    metadata
        .and_then(|m| m.get("order_id"))
        .and_then(Value::as_str)
        .or(client_reference)
        .and_then(|s| Uuid::parse_str(s).ok())
}

// expandable field: either an id string or the expanded object
fn object_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("id").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
