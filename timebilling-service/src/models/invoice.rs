//! Invoice model for timebilling-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Invoice lifecycle status. Stored as upper-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    /// Items may only be replaced while the invoice is still open.
    pub fn is_editable(&self) -> bool {
        !matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// Derived, never stored: a sent invoice whose due date has passed.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == InvoiceStatus::Sent && self.due_date < today
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub description: String,
    /// Hours, possibly fractional.
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub sort_order: i32,
}

/// Invoice with its items and derived flags, as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub is_overdue: bool,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceDetail {
    pub fn new(invoice: Invoice, items: Vec<InvoiceItem>, today: NaiveDate) -> Self {
        let is_overdue = invoice.is_overdue(today);
        Self {
            invoice,
            is_overdue,
            items,
        }
    }
}

/// A line to be written for a new or replaced invoice.
#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Everything the store needs to persist a generated draft and claim its entries
/// in one atomic step.
#[derive(Debug, Clone)]
pub struct NewDraftInvoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub items: Vec<NewInvoiceItem>,
    /// Exact entry ids that fed the preview; all must be claimed or nothing is written.
    pub entry_ids: Vec<Uuid>,
}

/// Replacement totals written together with a new item set.
#[derive(Debug, Clone, Copy)]
pub struct InvoiceTotalsUpdate {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub page_size: i64,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invoice(status: InvoiceStatus, due: &str) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            project_id: None,
            invoice_number: "INV-20260301-000001".to_string(),
            status,
            issue_date: "2026-03-01".parse().unwrap(),
            due_date: due.parse().unwrap(),
            subtotal: dec!(100.00),
            tax_rate: dec!(18.00),
            tax_amount: dec!(18.00),
            total: dec!(118.00),
            notes: None,
            created_by: Uuid::new_v4(),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn overdue_only_for_sent_invoices_past_due() {
        let today: NaiveDate = "2026-03-20".parse().unwrap();

        assert!(invoice(InvoiceStatus::Sent, "2026-03-16").is_overdue(today));
        assert!(!invoice(InvoiceStatus::Sent, "2026-03-20").is_overdue(today));
        assert!(!invoice(InvoiceStatus::Draft, "2026-03-16").is_overdue(today));
        assert!(!invoice(InvoiceStatus::Overdue, "2026-03-16").is_overdue(today));
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&InvoiceStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let parsed: InvoiceStatus = serde_json::from_str("\"OVERDUE\"").unwrap();
        assert_eq!(parsed, InvoiceStatus::Overdue);
        assert_eq!(parsed.to_string(), "OVERDUE");
    }

    #[test]
    fn paid_and_cancelled_are_not_editable() {
        assert!(InvoiceStatus::Draft.is_editable());
        assert!(InvoiceStatus::Overdue.is_editable());
        assert!(!InvoiceStatus::Paid.is_editable());
        assert!(!InvoiceStatus::Cancelled.is_editable());
    }
}
