pub mod cart;
pub mod coupon;
pub mod errors;
pub mod export;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod requester;
