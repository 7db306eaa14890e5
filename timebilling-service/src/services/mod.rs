//! Services for timebilling-service.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod store;

pub use database::PgBillingStore;
pub use memory::InMemoryBillingStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{HttpInvoiceNotifier, InvoiceNotifier, MockInvoiceNotifier, SentNotification};
pub use store::BillingStore;
