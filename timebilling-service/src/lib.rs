//! Time-entry billing service: turns unbilled time into draft invoices and
//! manages them afterwards.

pub mod billing;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
