//! Persistence seam for the billing engine.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::billing::InvoiceNumberRegistry;
use crate::models::{
    Client, Contributor, Invoice, InvoiceItem, InvoiceStatus, InvoiceTotalsUpdate,
    ListInvoicesFilter, NewDraftInvoice, NewInvoiceItem, Project, TimeEntry,
    UnbilledEntryQuery, WorkItem,
};

/// Tenant-scoped reads and the few atomic writes billing needs.
///
/// Every method filters by `tenant_id`; rows of other tenants and
/// soft-deleted rows behave as if absent.
#[async_trait]
pub trait BillingStore: InvoiceNumberRegistry {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn find_client(&self, tenant_id: Uuid, client_id: Uuid)
        -> Result<Option<Client>, AppError>;

    async fn find_project(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError>;

    async fn list_client_project_ids(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Entries with no billing claim matching `query`, ordered by date then id.
    async fn list_unbilled_entries(
        &self,
        tenant_id: Uuid,
        query: &UnbilledEntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError>;

    async fn find_contributors(
        &self,
        tenant_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Contributor>, AppError>;

    async fn find_work_items(
        &self,
        tenant_id: Uuid,
        work_item_ids: &[Uuid],
    ) -> Result<Vec<WorkItem>, AppError>;

    /// Insert the invoice and its items and claim `draft.entry_ids`, all or
    /// nothing. Fails with [`AppError::Conflict`] when fewer entries than
    /// expected could be claimed or the invoice number is already taken.
    async fn create_draft_with_claim(&self, draft: &NewDraftInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, tenant_id: Uuid, invoice_id: Uuid)
        -> Result<Option<Invoice>, AppError>;

    async fn get_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, AppError>;

    /// Ordered by invoice id; `page_token` is exclusive.
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Set `to` only if the current status is still `from`. `None` when it was not.
    async fn update_invoice_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError>;

    /// Soft-delete current items, insert `items` and write `totals` while the
    /// invoice is neither PAID nor CANCELLED. `None` when it no longer is.
    async fn replace_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        items: &[NewInvoiceItem],
        totals: InvoiceTotalsUpdate,
    ) -> Result<Option<Invoice>, AppError>;

    /// Soft-delete a non-PAID invoice and its items and clear the claim on
    /// its entries. `false` when nothing matched.
    async fn soft_delete_invoice(&self, tenant_id: Uuid, invoice_id: Uuid)
        -> Result<bool, AppError>;
}
