use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// The authenticated caller, as vouched for by the token verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Requester {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may act on a resource.
    pub fn may_access(&self, owner: Option<Uuid>) -> bool {
        self.is_admin() || owner == Some(self.id)
    }
}

/// Whoever is acting on an order: a signed-in user, or a guest presenting the
/// cart session the order was placed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller<'a> {
    User(&'a Requester),
    Guest(&'a str),
}

impl<'a> From<&'a Requester> for Caller<'a> {
    fn from(requester: &'a Requester) -> Self {
        Caller::User(requester)
    }
}

impl Caller<'_> {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Caller::User(r) => Some(r.id),
            Caller::Guest(_) => None,
        }
    }
}

impl fmt::Display for Caller<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::User(r) => write!(f, "user {}", r.id),
            Caller::Guest(_) => f.write_str("guest"),
        }
    }
}
