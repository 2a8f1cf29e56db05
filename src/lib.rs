//! FarmConnect payment and settlement core: M-Pesa STK push collection,
//! callback settlement, the farmer earnings ledger and payouts.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
