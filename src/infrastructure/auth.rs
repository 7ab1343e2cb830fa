use std::str::FromStr;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::ports::TokenVerifier;
use crate::domain::requester::{Requester, Role};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

/// HS256 bearer tokens shared with the account service.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub const DEFAULT_LIFETIME_DAYS: i64 = 7;

    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, requester: &Requester, lifetime: Duration) -> Result<String, DomainError> {
        let claims = Claims {
            user_id: requester.id.to_string(),
            email: requester.email.clone(),
            role: requester.role.to_string(),
            exp: (Utc::now() + lifetime).timestamp().max(0) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DomainError::Internal(format!("failed to sign token: {e}")))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Option<Requester> {
        let data = match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("rejected bearer token: {e}");
                return None;
            }
        };
        let claims = data.claims;
        Some(Requester {
            id: Uuid::parse_str(&claims.user_id).ok()?,
            email: claims.email,
            role: Role::from_str(&claims.role).unwrap_or(Role::Customer),
        })
    }
}
