//! Subtotal, flat-rate tax and total.

use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;

use super::round_money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Sum already-rounded line amounts and apply `tax_rate` (a percentage).
pub fn compute_totals<I>(amounts: I, tax_rate: Decimal) -> Totals
where
    I: IntoIterator<Item = Decimal>,
{
    let subtotal = round_money(amounts.into_iter().sum());
    let tax_amount = round_money(subtotal * tax_rate / Decimal::ONE_HUNDRED);

    Totals {
        subtotal,
        tax_rate: round_money(tax_rate),
        tax_amount,
        total: round_money(subtotal + tax_amount),
    }
}

/// A caller-supplied tax rate must be a percentage in `0..=100` with at most
/// two decimals.
pub fn validate_tax_rate(rate: Decimal) -> Result<Decimal, AppError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Tax rate must be between 0 and 100, got {}",
            rate
        )));
    }
    if rate.normalize().scale() > 2 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Tax rate must have at most two decimal places, got {}",
            rate
        )));
    }
    Ok(round_money(rate))
}
