pub mod cart_service;
pub mod coupon_service;
pub mod order_service;
pub mod payment_service;

use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::Order;
use crate::domain::ports::{OrderRepository, UserDirectory};
use crate::domain::requester::Caller;

/// Loads an order the caller owns (or any order, for admins).
pub(crate) fn load_owned_order(
    orders: &dyn OrderRepository,
    order_id: Uuid,
    caller: Caller<'_>,
) -> Result<Order, DomainError> {
    let order = orders
        .find_by_id(order_id)?
        .ok_or_else(|| DomainError::not_found("Order"))?;
    if !order.accessible_by(caller) {
        return Err(DomainError::Forbidden(format!(
            "order {order_id} belongs to another customer"
        )));
    }
    Ok(order)
}

/// Where customer mail for `order` goes: the owner's current address, else the
/// address captured at checkout.
pub(crate) fn recipient_for(users: &dyn UserDirectory, order: &Order) -> Option<String> {
    if let Some(user_id) = order.user_id {
        match users.email_of(user_id) {
            Ok(Some(email)) => return Some(email),
            Ok(None) => {}
            Err(e) => log::warn!("could not look up email for user {user_id}: {e}"),
        }
    }
    order.customer_email.clone()
}

/// Notification failures never fail the state change that triggered them.
pub(crate) fn best_effort(what: &str, order_id: Uuid, result: Result<(), DomainError>) {
    if let Err(e) = result {
        log::warn!("{what} notification for order {order_id} failed: {e}");
    }
}
