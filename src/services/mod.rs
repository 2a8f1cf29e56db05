//! Business logic for the payment and settlement core

pub mod ledger;
pub mod order_lifecycle;
pub mod payment_callback;
pub mod payment_initiation;
pub mod payout;
pub mod refund;
