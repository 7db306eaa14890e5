//! Invoice status transitions.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use service_core::error::AppError;

use crate::models::InvoiceStatus;

/// Allowed next states per current state. PAID and CANCELLED are terminal.
static TRANSITIONS: Lazy<HashMap<InvoiceStatus, &'static [InvoiceStatus]>> = Lazy::new(|| {
    use InvoiceStatus::*;
    let table: [(InvoiceStatus, &'static [InvoiceStatus]); 5] = [
        (Draft, &[Sent, Cancelled]),
        (Sent, &[Paid, Overdue, Cancelled]),
        (Overdue, &[Paid, Cancelled]),
        (Paid, &[]),
        (Cancelled, &[]),
    ];
    HashMap::from(table)
});

pub fn allowed_transitions(from: InvoiceStatus) -> &'static [InvoiceStatus] {
    TRANSITIONS.get(&from).copied().unwrap_or(&[])
}

pub fn is_terminal(status: InvoiceStatus) -> bool {
    allowed_transitions(status).is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested status equals the current one; nothing to write.
    Unchanged,
    Apply {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
}

pub fn check_transition(from: InvoiceStatus, to: InvoiceStatus) -> Result<Transition, AppError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if allowed_transitions(from).contains(&to) {
        return Ok(Transition::Apply { from, to });
    }
    Err(AppError::BusinessRule(anyhow::anyhow!(
        "Invalid status transition from {} to {}",
        from,
        to
    )))
}
