//! HTTP handlers for timebilling-service.

pub mod health;
pub mod invoices;
pub mod preview;
pub mod webhooks;

pub use health::{health_check, metrics_handler, readiness_check};
