pub mod cart;
pub mod coupons;
pub mod orders;
pub mod payments;

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::domain::errors::DomainError;
use crate::domain::requester::{Caller, Requester};
use crate::errors::AppError;
use crate::AppState;

/// Runs blocking service code on actix's thread pool.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, DomainError> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

/// `None` without an `Authorization` header; an error for a malformed or rejected one.
fn bearer(req: &HttpRequest) -> Result<Option<Requester>, AppError> {
    let Some(header) = req.headers().get("authorization") else {
        return Ok(None);
    };
    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state missing".into()))?;
    state
        .tokens
        .verify(token.trim())
        .map(Some)
        .ok_or(AppError::Unauthorized)
}

/// A caller with a valid bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Requester);

impl FromRequest for Authenticated {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(bearer(req).and_then(|r| r.map(Authenticated).ok_or(AppError::Unauthorized)))
    }
}

/// Guest or signed-in caller. A token that is present must still be valid.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<Requester>);

impl FromRequest for MaybeAuthenticated {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(bearer(req).map(MaybeAuthenticated))
    }
}

#[derive(Debug, Clone)]
pub struct Admin(pub Requester);

impl FromRequest for Admin {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(match bearer(req) {
            Ok(Some(r)) if r.is_admin() => Ok(Admin(r)),
            Ok(Some(_)) => Err(AppError::Forbidden("Admin access required".into())),
            Ok(None) => Err(AppError::Unauthorized),
            Err(e) => Err(e),
        })
    }
}

/// Cart session a guest presents to reach an order placed from it.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct GuestSession {
    /// Cart `session_id` the guest order was placed with. Ignored when a token is sent.
    pub session_id: Option<String>,
}

/// Owned [`Caller`] that can be moved onto the blocking pool.
#[derive(Debug, Clone)]
pub(crate) enum Party {
    User(Requester),
    Guest(String),
}

impl Party {
    /// A token wins over a session id; with neither the caller is unauthenticated.
    pub(crate) fn resolve(
        requester: Option<Requester>,
        session_id: Option<String>,
    ) -> Result<Self, AppError> {
        match (requester, session_id.filter(|s| !s.trim().is_empty())) {
            (Some(requester), _) => Ok(Party::User(requester)),
            (None, Some(session)) => Ok(Party::Guest(session)),
            (None, None) => Err(AppError::Unauthorized),
        }
    }

    pub(crate) fn as_caller(&self) -> Caller<'_> {
        match self {
            Party::User(requester) => Caller::User(requester),
            Party::Guest(session) => Caller::Guest(session),
        }
    }
}
