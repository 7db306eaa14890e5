//! Time-entry-to-invoice billing engine.
//!
//! Leaves first: [`rates`] and [`aggregator`] turn entries into line items,
//! [`totals`] applies tax, [`preview`] orchestrates them read-only,
//! [`numbering`] and [`generator`] persist a draft, and [`status`] /
//! [`lifecycle`] govern what happens to it afterwards.

pub mod aggregator;
pub mod generator;
pub mod lifecycle;
pub mod numbering;
pub mod preview;
pub mod rates;
pub mod status;
pub mod totals;

use rust_decimal::{Decimal, RoundingStrategy};

pub use aggregator::aggregate;
pub use generator::DraftGenerator;
pub use lifecycle::{InvoiceLifecycle, InvoicePage, ManualInvoiceItem};
pub use numbering::{InvoiceNumberAllocator, InvoiceNumberRegistry};
pub use preview::PreviewEngine;
pub use rates::{resolve_rates, ResolvedRates};
pub use status::{check_transition, Transition};
pub use totals::{compute_totals, validate_tax_rate, Totals};

/// Engine knobs that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BillingSettings {
    pub default_tax_rate: Decimal,
    pub payment_terms_days: i64,
    pub invoice_number_attempts: u32,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            default_tax_rate: Decimal::new(1800, 2),
            payment_terms_days: 15,
            invoice_number_attempts: 10,
        }
    }
}

/// Round half-up to currency precision and pin the scale to two digits.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Decimal hours for a minute count, rounded like money.
pub fn minutes_to_hours(minutes: i64) -> Decimal {
    round_money(Decimal::from(minutes) / Decimal::from(60))
}
