//! In-process [`BillingStore`] for local runs and tests.
//!
//! All state sits behind one mutex, so every trait method is atomic with
//! respect to every other, which is what the draft claim relies on.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

use super::store::BillingStore;
use crate::billing::InvoiceNumberRegistry;
use crate::models::{
    Client, Contributor, Invoice, InvoiceItem, InvoiceStatus, InvoiceTotalsUpdate,
    ListInvoicesFilter, NewDraftInvoice, NewInvoiceItem, Project, TimeEntry,
    UnbilledEntryQuery, WorkItem,
};

struct Row<T> {
    value: T,
    deleted: bool,
}

impl<T> Row<T> {
    fn live(value: T) -> Self {
        Self {
            value,
            deleted: false,
        }
    }
}

#[derive(Default)]
struct State {
    clients: Vec<Client>,
    projects: Vec<Project>,
    contributors: Vec<Contributor>,
    work_items: Vec<WorkItem>,
    entries: Vec<TimeEntry>,
    invoices: Vec<Row<Invoice>>,
    items: Vec<Row<InvoiceItem>>,
}

impl State {
    fn live_invoice_mut(&mut self, tenant_id: Uuid, invoice_id: Uuid) -> Option<&mut Invoice> {
        self.invoices
            .iter_mut()
            .filter(|r| !r.deleted)
            .map(|r| &mut r.value)
            .find(|i| i.tenant_id == tenant_id && i.invoice_id == invoice_id)
    }

    fn insert_items(&mut self, tenant_id: Uuid, invoice_id: Uuid, items: &[NewInvoiceItem]) {
        for (position, item) in items.iter().enumerate() {
            self.items.push(Row::live(InvoiceItem {
                item_id: Uuid::new_v4(),
                invoice_id,
                tenant_id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: item.amount,
                sort_order: position as i32,
            }));
        }
    }

    fn delete_items(&mut self, tenant_id: Uuid, invoice_id: Uuid) {
        for row in self.items.iter_mut().filter(|r| {
            !r.deleted && r.value.tenant_id == tenant_id && r.value.invoice_id == invoice_id
        }) {
            row.deleted = true;
        }
    }
}

#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_client(&self, tenant_id: Uuid, name: &str) -> Uuid {
        let client_id = Uuid::new_v4();
        self.state().clients.push(Client {
            client_id,
            tenant_id,
            name: name.to_string(),
        });
        client_id
    }

    pub fn add_project(&self, tenant_id: Uuid, client_id: Uuid, name: &str) -> Uuid {
        let project_id = Uuid::new_v4();
        self.state().projects.push(Project {
            project_id,
            tenant_id,
            client_id,
            name: name.to_string(),
        });
        project_id
    }

    pub fn add_contributor(
        &self,
        tenant_id: Uuid,
        name: &str,
        email: &str,
        hourly_rate: Option<Decimal>,
    ) -> Uuid {
        let user_id = Uuid::new_v4();
        self.state().contributors.push(Contributor {
            user_id,
            tenant_id,
            name: name.to_string(),
            email: email.to_string(),
            hourly_rate,
        });
        user_id
    }

    pub fn set_hourly_rate(&self, user_id: Uuid, hourly_rate: Option<Decimal>) {
        if let Some(c) = self
            .state()
            .contributors
            .iter_mut()
            .find(|c| c.user_id == user_id)
        {
            c.hourly_rate = hourly_rate;
        }
    }

    pub fn add_work_item(&self, tenant_id: Uuid, project_id: Uuid, title: &str) -> Uuid {
        let work_item_id = Uuid::new_v4();
        self.state().work_items.push(WorkItem {
            work_item_id,
            tenant_id,
            project_id,
            title: title.to_string(),
        });
        work_item_id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_entry(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        project_id: Uuid,
        work_item_id: Option<Uuid>,
        work_date: NaiveDate,
        hours: i32,
        billable: bool,
        notes: Option<&str>,
    ) -> Uuid {
        let time_entry_id = Uuid::new_v4();
        self.state().entries.push(TimeEntry {
            time_entry_id,
            tenant_id,
            user_id,
            project_id,
            work_item_id,
            work_date,
            hours,
            billable,
            notes: notes.map(str::to_string),
            billed_invoice_id: None,
            billed_at: None,
        });
        time_entry_id
    }

    pub fn entry(&self, time_entry_id: Uuid) -> Option<TimeEntry> {
        self.state()
            .entries
            .iter()
            .find(|e| e.time_entry_id == time_entry_id)
            .cloned()
    }

    pub fn invoice(&self, tenant_id: Uuid, invoice_id: Uuid) -> Option<Invoice> {
        self.state()
            .live_invoice_mut(tenant_id, invoice_id)
            .map(|i| i.clone())
    }

    /// Live (not deleted) invoices of the tenant.
    pub fn invoice_count(&self, tenant_id: Uuid) -> usize {
        self.state()
            .invoices
            .iter()
            .filter(|r| !r.deleted && r.value.tenant_id == tenant_id)
            .count()
    }

    pub fn billed_entry_count(&self, tenant_id: Uuid) -> usize {
        self.state()
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.is_billed())
            .count()
    }

    pub fn set_due_date(&self, tenant_id: Uuid, invoice_id: Uuid, due_date: NaiveDate) {
        if let Some(invoice) = self.state().live_invoice_mut(tenant_id, invoice_id) {
            invoice.due_date = due_date;
        }
    }
}

#[async_trait]
impl InvoiceNumberRegistry for InMemoryBillingStore {
    async fn invoice_number_exists(&self, tenant_id: Uuid, number: &str) -> Result<bool, AppError> {
        Ok(self
            .state()
            .invoices
            .iter()
            .any(|r| r.value.tenant_id == tenant_id && r.value.invoice_number == number))
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        Ok(self
            .state()
            .clients
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.client_id == client_id)
            .cloned())
    }

    async fn find_project(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        Ok(self
            .state()
            .projects
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.project_id == project_id)
            .cloned())
    }

    async fn list_client_project_ids(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut ids: Vec<Uuid> = self
            .state()
            .projects
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.client_id == client_id)
            .map(|p| p.project_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_unbilled_entries(
        &self,
        tenant_id: Uuid,
        query: &UnbilledEntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let mut entries: Vec<TimeEntry> = self
            .state()
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && query.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.work_date
                .cmp(&b.work_date)
                .then(a.time_entry_id.cmp(&b.time_entry_id))
        });
        Ok(entries)
    }

    async fn find_contributors(
        &self,
        tenant_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Contributor>, AppError> {
        Ok(self
            .state()
            .contributors
            .iter()
            .filter(|c| c.tenant_id == tenant_id && user_ids.contains(&c.user_id))
            .cloned()
            .collect())
    }

    async fn find_work_items(
        &self,
        tenant_id: Uuid,
        work_item_ids: &[Uuid],
    ) -> Result<Vec<WorkItem>, AppError> {
        Ok(self
            .state()
            .work_items
            .iter()
            .filter(|w| w.tenant_id == tenant_id && work_item_ids.contains(&w.work_item_id))
            .cloned()
            .collect())
    }

    async fn create_draft_with_claim(&self, draft: &NewDraftInvoice) -> Result<Invoice, AppError> {
        let mut state = self.state();

        if state.invoices.iter().any(|r| {
            r.value.tenant_id == draft.tenant_id && r.value.invoice_number == draft.invoice_number
        }) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number {} is already in use",
                draft.invoice_number
            )));
        }

        let wanted: HashSet<Uuid> = draft.entry_ids.iter().copied().collect();
        let claimable = state
            .entries
            .iter()
            .filter(|e| {
                e.tenant_id == draft.tenant_id
                    && !e.is_billed()
                    && wanted.contains(&e.time_entry_id)
            })
            .count();
        if claimable != draft.entry_ids.len() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Expected to claim {} time entries but only {} were still unbilled",
                draft.entry_ids.len(),
                claimable
            )));
        }

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: draft.invoice_id,
            tenant_id: draft.tenant_id,
            client_id: draft.client_id,
            project_id: draft.project_id,
            invoice_number: draft.invoice_number.clone(),
            status: InvoiceStatus::Draft,
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            subtotal: draft.subtotal,
            tax_rate: draft.tax_rate,
            tax_amount: draft.tax_amount,
            total: draft.total,
            notes: draft.notes.clone(),
            created_by: draft.created_by,
            created_utc: now,
            updated_utc: now,
        };

        state.invoices.push(Row::live(invoice.clone()));
        state.insert_items(draft.tenant_id, draft.invoice_id, &draft.items);
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.tenant_id == draft.tenant_id && wanted.contains(&e.time_entry_id))
        {
            entry.billed_invoice_id = Some(draft.invoice_id);
            entry.billed_at = Some(now);
        }

        Ok(invoice)
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoice(tenant_id, invoice_id))
    }

    async fn get_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, AppError> {
        let mut items: Vec<InvoiceItem> = self
            .state()
            .items
            .iter()
            .filter(|r| {
                !r.deleted && r.value.tenant_id == tenant_id && r.value.invoice_id == invoice_id
            })
            .map(|r| r.value.clone())
            .collect();
        items.sort_by_key(|i| i.sort_order);
        Ok(items)
    }

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<Invoice> = self
            .state()
            .invoices
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| &r.value)
            .filter(|i| {
                i.tenant_id == tenant_id
                    && filter.status.map_or(true, |s| i.status == s)
                    && filter.client_id.map_or(true, |c| i.client_id == c)
                    && filter.page_token.map_or(true, |t| i.invoice_id > t)
            })
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.invoice_id);
        invoices.truncate(filter.page_size.max(0) as usize);
        Ok(invoices)
    }

    async fn update_invoice_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state();
        Ok(state
            .live_invoice_mut(tenant_id, invoice_id)
            .filter(|i| i.status == from)
            .map(|invoice| {
                invoice.status = to;
                invoice.updated_utc = Utc::now();
                invoice.clone()
            }))
    }

    async fn replace_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        items: &[NewInvoiceItem],
        totals: InvoiceTotalsUpdate,
    ) -> Result<Option<Invoice>, AppError> {
        let mut state = self.state();

        let updated = match state
            .live_invoice_mut(tenant_id, invoice_id)
            .filter(|i| i.status.is_editable())
        {
            Some(invoice) => {
                invoice.subtotal = totals.subtotal;
                invoice.tax_amount = totals.tax_amount;
                invoice.total = totals.total;
                invoice.updated_utc = Utc::now();
                invoice.clone()
            }
            None => return Ok(None),
        };

        state.delete_items(tenant_id, invoice_id);
        state.insert_items(tenant_id, invoice_id, items);
        Ok(Some(updated))
    }

    async fn soft_delete_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut state = self.state();

        let Some(row) = state.invoices.iter_mut().find(|r| {
            !r.deleted
                && r.value.tenant_id == tenant_id
                && r.value.invoice_id == invoice_id
                && r.value.status != InvoiceStatus::Paid
        }) else {
            return Ok(false);
        };
        row.deleted = true;

        state.delete_items(tenant_id, invoice_id);
        for entry in state
            .entries
            .iter_mut()
            .filter(|e| e.tenant_id == tenant_id && e.billed_invoice_id == Some(invoice_id))
        {
            entry.billed_invoice_id = None;
            entry.billed_at = None;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: InMemoryBillingStore,
        tenant_id: Uuid,
        client_id: Uuid,
        first: Uuid,
        second: Uuid,
    }

    fn fixture() -> Fixture {
        let store = InMemoryBillingStore::new();
        let tenant_id = Uuid::new_v4();
        let client_id = store.add_client(tenant_id, "Acme Corp");
        let project_id = store.add_project(tenant_id, client_id, "Website");
        let user = store.add_contributor(tenant_id, "Alice", "alice@example.com", Some(dec!(50)));
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let first = store.add_entry(tenant_id, user, project_id, None, day, 2, true, None);
        let second = store.add_entry(tenant_id, user, project_id, None, day, 3, true, None);
        Fixture {
            store,
            tenant_id,
            client_id,
            first,
            second,
        }
    }

    fn draft(fx: &Fixture, number: &str, entry_ids: Vec<Uuid>) -> NewDraftInvoice {
        let day = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        NewDraftInvoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: fx.tenant_id,
            client_id: fx.client_id,
            project_id: None,
            invoice_number: number.to_string(),
            issue_date: day,
            due_date: day,
            subtotal: dec!(100.00),
            tax_rate: dec!(0),
            tax_amount: dec!(0.00),
            total: dec!(100.00),
            notes: None,
            created_by: Uuid::new_v4(),
            items: vec![NewInvoiceItem {
                description: "Services – Alice".to_string(),
                quantity: dec!(2.00),
                unit_price: dec!(50.00),
                amount: dec!(100.00),
            }],
            entry_ids,
        }
    }

    #[tokio::test]
    async fn short_claim_writes_nothing() {
        let fx = fixture();
        let winner = draft(&fx, "INV-20260401-000001", vec![fx.first]);
        fx.store.create_draft_with_claim(&winner).await.unwrap();

        let loser = draft(&fx, "INV-20260401-000002", vec![fx.first, fx.second]);
        let result = fx.store.create_draft_with_claim(&loser).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(fx.store.invoice_count(fx.tenant_id), 1);
        assert!(fx.store.invoice(fx.tenant_id, loser.invoice_id).is_none());
        assert!(fx
            .store
            .get_invoice_items(fx.tenant_id, loser.invoice_id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            fx.store.entry(fx.first).and_then(|e| e.billed_invoice_id),
            Some(winner.invoice_id)
        );
        assert!(!fx.store.entry(fx.second).unwrap().is_billed());
    }

    #[tokio::test]
    async fn taken_number_is_a_conflict() {
        let fx = fixture();
        let first = draft(&fx, "INV-20260401-000001", vec![fx.first]);
        fx.store.create_draft_with_claim(&first).await.unwrap();

        let clash = draft(&fx, "INV-20260401-000001", vec![fx.second]);
        let result = fx.store.create_draft_with_claim(&clash).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(!fx.store.entry(fx.second).unwrap().is_billed());
    }

    #[tokio::test]
    async fn deleting_a_draft_releases_its_entries() {
        let fx = fixture();
        let invoice = draft(&fx, "INV-20260401-000001", vec![fx.first, fx.second]);
        fx.store.create_draft_with_claim(&invoice).await.unwrap();
        assert_eq!(fx.store.billed_entry_count(fx.tenant_id), 2);

        assert!(fx
            .store
            .soft_delete_invoice(fx.tenant_id, invoice.invoice_id)
            .await
            .unwrap());

        assert_eq!(fx.store.billed_entry_count(fx.tenant_id), 0);
        assert_eq!(fx.store.invoice_count(fx.tenant_id), 0);
    }
}
