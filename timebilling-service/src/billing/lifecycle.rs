//! Operations on invoices after generation: reads, status changes, manual
//! item edits and soft delete.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::status::{check_transition, Transition};
use super::totals::compute_totals;
use super::round_money;
use crate::models::{
    Invoice, InvoiceDetail, InvoiceStatus, InvoiceTotalsUpdate, ListInvoicesFilter,
    NewInvoiceItem,
};
use crate::services::metrics::STATUS_TRANSITIONS_TOTAL;
use crate::services::{BillingStore, InvoiceNotifier};

/// A line supplied by a user when replacing an invoice's items.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManualInvoiceItem {
    #[validate(length(min = 1, max = 500, message = "Description must be 1-500 characters"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSummary {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoicePage {
    pub invoices: Vec<InvoiceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<Uuid>,
}

#[derive(Clone)]
pub struct InvoiceLifecycle {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn InvoiceNotifier>,
}

impl InvoiceLifecycle {
    pub fn new(store: Arc<dyn BillingStore>, notifier: Arc<dyn InvoiceNotifier>) -> Self {
        Self { store, notifier }
    }

    async fn load(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
    }

    async fn detail(&self, invoice: Invoice) -> Result<InvoiceDetail, AppError> {
        let items = self
            .store
            .get_invoice_items(invoice.tenant_id, invoice.invoice_id)
            .await?;
        Ok(InvoiceDetail::new(invoice, items, Utc::now().date_naive()))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self.load(tenant_id, invoice_id).await?;
        self.detail(invoice).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        mut filter: ListInvoicesFilter,
    ) -> Result<InvoicePage, AppError> {
        filter.page_size = filter.page_size.clamp(1, 100);
        let invoices = self.store.list_invoices(tenant_id, &filter).await?;

        let next_page_token = if invoices.len() as i64 == filter.page_size {
            invoices.last().map(|i| i.invoice_id)
        } else {
            None
        };
        let today = Utc::now().date_naive();

        Ok(InvoicePage {
            invoices: invoices
                .into_iter()
                .map(|invoice| InvoiceSummary {
                    is_overdue: invoice.is_overdue(today),
                    invoice,
                })
                .collect(),
            next_page_token,
        })
    }

    /// Validate and apply a status change, then tell the invoice's creator.
    ///
    /// `actor_id` is `None` for system-initiated changes such as payment
    /// webhooks. Requesting the current status succeeds without writing or
    /// notifying.
    /// The write is conditional on the status read here, so a concurrent
    /// change surfaces as a conflict rather than skipping a validation.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, to = %to))]
    pub async fn update_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        to: InvoiceStatus,
        actor_id: Option<Uuid>,
    ) -> Result<InvoiceDetail, AppError> {
        let invoice = self.load(tenant_id, invoice_id).await?;

        let from = match check_transition(invoice.status, to)? {
            Transition::Unchanged => return self.detail(invoice).await,
            Transition::Apply { from, .. } => from,
        };

        let updated = self
            .store
            .update_invoice_status(tenant_id, invoice_id, from, to)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} changed status concurrently; expected {}",
                    invoice_id,
                    from
                ))
            })?;

        STATUS_TRANSITIONS_TOTAL
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
        info!(from = %from, "Invoice status updated");

        if let Err(e) = self.notifier.status_changed(&updated, from, actor_id).await {
            warn!(error = %e, "Failed to notify invoice creator");
        }

        self.detail(updated).await
    }

    /// Replace every item of an open invoice and recompute totals with the
    /// invoice's stored tax rate.
    #[instrument(skip(self, items), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, items = items.len()))]
    pub async fn replace_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        items: Vec<ManualInvoiceItem>,
    ) -> Result<InvoiceDetail, AppError> {
        if items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "An invoice needs at least one item"
            )));
        }
        for item in &items {
            item.validate()?;
            if item.description.trim().is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item description cannot be blank"
                )));
            }
            if item.quantity <= Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item quantity must be positive"
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Item unit price cannot be negative"
                )));
            }
        }

        let invoice = self.load(tenant_id, invoice_id).await?;
        if !invoice.status.is_editable() {
            return Err(AppError::BusinessRule(anyhow::anyhow!(
                "Cannot edit items of a {} invoice",
                invoice.status
            )));
        }

        let new_items: Vec<NewInvoiceItem> = items
            .into_iter()
            .map(|item| {
                let quantity = round_money(item.quantity);
                let unit_price = round_money(item.unit_price);
                NewInvoiceItem {
                    description: item.description.trim().to_string(),
                    amount: round_money(quantity * unit_price),
                    quantity,
                    unit_price,
                }
            })
            .collect();
        let totals = compute_totals(new_items.iter().map(|i| i.amount), invoice.tax_rate);

        let updated = self
            .store
            .replace_invoice_items(
                tenant_id,
                invoice_id,
                &new_items,
                InvoiceTotalsUpdate {
                    subtotal: totals.subtotal,
                    tax_amount: totals.tax_amount,
                    total: totals.total,
                },
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} was closed while its items were being edited",
                    invoice_id
                ))
            })?;

        info!(total = %updated.total, "Invoice items replaced");
        self.detail(updated).await
    }

    /// Soft-delete a non-paid invoice with its items and release its entries.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn delete(&self, tenant_id: Uuid, invoice_id: Uuid) -> Result<(), AppError> {
        let invoice = self.load(tenant_id, invoice_id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(AppError::BusinessRule(anyhow::anyhow!(
                "Paid invoices cannot be deleted"
            )));
        }

        if !self.store.soft_delete_invoice(tenant_id, invoice_id).await? {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} was paid or removed concurrently",
                invoice_id
            )));
        }

        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");
        Ok(())
    }
}
