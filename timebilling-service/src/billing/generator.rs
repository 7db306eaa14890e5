//! Confirmed generation of a draft invoice from a fresh preview.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::numbering::InvoiceNumberAllocator;
use super::preview::PreviewEngine;
use super::totals::{compute_totals, validate_tax_rate, Totals};
use super::BillingSettings;
use crate::models::{GenerateRequest, GenerationResult, NewDraftInvoice, NewInvoiceItem};
use crate::services::metrics::{
    CLAIM_CONFLICTS_TOTAL, INVOICED_AMOUNT_TOTAL, INVOICES_GENERATED_TOTAL,
    TIME_ENTRIES_BILLED_TOTAL,
};
use crate::services::BillingStore;

#[derive(Clone)]
pub struct DraftGenerator {
    store: Arc<dyn BillingStore>,
    preview: PreviewEngine,
    numbers: InvoiceNumberAllocator,
    payment_terms_days: i64,
}

impl DraftGenerator {
    pub fn new(store: Arc<dyn BillingStore>, settings: BillingSettings) -> Self {
        Self {
            preview: PreviewEngine::new(store.clone(), settings.default_tax_rate),
            numbers: InvoiceNumberAllocator::new(settings.invoice_number_attempts),
            payment_terms_days: settings.payment_terms_days,
            store,
        }
    }

    /// Persist a DRAFT invoice and claim its entries, or change nothing.
    ///
    /// The preview is recomputed here rather than trusted from the caller, so
    /// rates or entries that changed since the user looked are picked up.
    #[instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, actor_id = %actor_id, client_id = %request.filters.client_id)
    )]
    pub async fn generate(
        &self,
        tenant_id: Uuid,
        actor_id: Uuid,
        request: &GenerateRequest,
    ) -> Result<GenerationResult, AppError> {
        if !request.confirmed {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice generation must be explicitly confirmed"
            )));
        }
        let tax_override = request.tax_rate.map(validate_tax_rate).transpose()?;

        let preview = self.preview.preview(tenant_id, &request.filters).await?;
        if !preview.can_generate || preview.entries_count == 0 {
            return Err(AppError::BusinessRule(anyhow::anyhow!("{}", preview.message)));
        }

        let totals = match tax_override {
            Some(rate) => compute_totals(preview.line_items.iter().map(|i| i.amount), rate),
            None => Totals {
                subtotal: preview.subtotal,
                tax_rate: preview.tax_rate,
                tax_amount: preview.tax_amount,
                total: preview.total,
            },
        };

        let issue_date = Utc::now().date_naive();
        let invoice_number = self
            .numbers
            .allocate(self.store.as_ref(), tenant_id, issue_date)
            .await?;

        let items = preview
            .line_items
            .iter()
            .map(|line| NewInvoiceItem {
                description: match &line.notes {
                    Some(notes) => format!("{} ({})", line.description, notes),
                    None => line.description.clone(),
                },
                quantity: line.hours,
                unit_price: line.unit_price,
                amount: line.amount,
            })
            .collect();

        let draft = NewDraftInvoice {
            invoice_id: Uuid::new_v4(),
            tenant_id,
            client_id: preview.client_id,
            project_id: preview.project_id,
            invoice_number,
            issue_date,
            due_date: issue_date + Duration::days(self.payment_terms_days),
            subtotal: totals.subtotal,
            tax_rate: totals.tax_rate,
            tax_amount: totals.tax_amount,
            total: totals.total,
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            created_by: actor_id,
            items,
            entry_ids: preview.entry_ids.clone(),
        };

        let invoice = self
            .store
            .create_draft_with_claim(&draft)
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::Conflict(_)) {
                    warn!(error = %e, "Draft generation lost a billing race");
                    CLAIM_CONFLICTS_TOTAL.inc();
                }
                INVOICES_GENERATED_TOTAL.with_label_values(&[e.kind()]).inc();
            })?;

        INVOICES_GENERATED_TOTAL.with_label_values(&["success"]).inc();
        TIME_ENTRIES_BILLED_TOTAL.inc_by(preview.entry_ids.len() as f64);
        INVOICED_AMOUNT_TOTAL.inc_by(invoice.total.to_f64().unwrap_or_default());

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            entries_billed = preview.entry_ids.len(),
            total = %invoice.total,
            "Draft invoice generated"
        );

        Ok(GenerationResult {
            invoice_id: invoice.invoice_id,
            message: format!(
                "Invoice {} created with {} time entries",
                invoice.invoice_number,
                preview.entry_ids.len()
            ),
            invoice_number: invoice.invoice_number,
            total: invoice.total,
            entries_billed: preview.entry_ids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupBy, InvoiceStatus, PreviewFilters};
    use crate::services::InMemoryBillingStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    struct Setup {
        store: Arc<InMemoryBillingStore>,
        generator: DraftGenerator,
        tenant_id: Uuid,
        client_id: Uuid,
        entries: Vec<Uuid>,
    }

    fn d(value: &str) -> NaiveDate {
        value.parse().unwrap()
    }

    fn setup() -> Setup {
        let store = Arc::new(InMemoryBillingStore::new());
        let tenant_id = Uuid::new_v4();
        let client_id = store.add_client(tenant_id, "Acme Corp");
        let project_id = store.add_project(tenant_id, client_id, "Website");
        let alice = store.add_contributor(tenant_id, "Alice", "alice@example.com", Some(dec!(50)));
        let bob = store.add_contributor(tenant_id, "Bob", "bob@example.com", Some(dec!(80)));
        let entries = vec![
            store.add_entry(tenant_id, alice, project_id, None, d("2026-03-05"), 3, true, None),
            store.add_entry(tenant_id, bob, project_id, None, d("2026-03-06"), 2, true, None),
        ];
        let generator = DraftGenerator::new(store.clone(), BillingSettings::default());
        Setup {
            store,
            generator,
            tenant_id,
            client_id,
            entries,
        }
    }

    fn request(s: &Setup, confirmed: bool) -> GenerateRequest {
        GenerateRequest {
            filters: PreviewFilters {
                client_id: s.client_id,
                project_id: None,
                from_date: d("2026-03-01"),
                to_date: d("2026-03-31"),
                billable_only: true,
                group_by: GroupBy::ByContributor,
                include_descriptions: false,
            },
            tax_rate: None,
            notes: Some("  March work  ".to_string()),
            confirmed,
        }
    }

    #[tokio::test]
    async fn unconfirmed_request_changes_nothing() {
        let s = setup();

        let result = s
            .generator
            .generate(s.tenant_id, Uuid::new_v4(), &request(&s, false))
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(s.store.invoice_count(s.tenant_id), 0);
        assert_eq!(s.store.billed_entry_count(s.tenant_id), 0);
    }

    #[tokio::test]
    async fn creates_draft_and_claims_entries() {
        let s = setup();
        let actor = Uuid::new_v4();

        let result = s
            .generator
            .generate(s.tenant_id, actor, &request(&s, true))
            .await
            .unwrap();

        assert_eq!(result.total, dec!(365.80));
        assert_eq!(result.entries_billed, 2);
        assert!(result.invoice_number.starts_with("INV-"));

        let invoice = s
            .store
            .invoice(s.tenant_id, result.invoice_id)
            .expect("invoice stored");
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.created_by, actor);
        assert_eq!(invoice.notes.as_deref(), Some("March work"));
        assert_eq!(invoice.due_date - invoice.issue_date, Duration::days(15));
        for id in &s.entries {
            assert_eq!(
                s.store.entry(*id).and_then(|e| e.billed_invoice_id),
                Some(result.invoice_id)
            );
        }
    }

    #[tokio::test]
    async fn tax_override_recomputes_totals() {
        let s = setup();
        let mut req = request(&s, true);
        req.tax_rate = Some(dec!(5));

        let result = s
            .generator
            .generate(s.tenant_id, Uuid::new_v4(), &req)
            .await
            .unwrap();

        // 310.00 + 15.50
        assert_eq!(result.total, dec!(325.50));
        let invoice = s.store.invoice(s.tenant_id, result.invoice_id).unwrap();
        assert_eq!(invoice.subtotal, dec!(310.00));
        assert_eq!(invoice.tax_rate, dec!(5.00));
    }

    #[tokio::test]
    async fn invalid_tax_override_is_rejected_before_any_write() {
        let s = setup();
        let mut req = request(&s, true);
        req.tax_rate = Some(dec!(101));

        let result = s.generator.generate(s.tenant_id, Uuid::new_v4(), &req).await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(s.store.invoice_count(s.tenant_id), 0);
    }

    #[tokio::test]
    async fn second_generation_finds_nothing_left() {
        let s = setup();
        s.generator
            .generate(s.tenant_id, Uuid::new_v4(), &request(&s, true))
            .await
            .unwrap();

        let again = s
            .generator
            .generate(s.tenant_id, Uuid::new_v4(), &request(&s, true))
            .await;

        match again {
            Err(AppError::BusinessRule(e)) => assert!(e.to_string().contains("No unbilled")),
            other => panic!("expected business rule error, got {:?}", other.map(|r| r.invoice_id)),
        }
        assert_eq!(s.store.invoice_count(s.tenant_id), 1);
    }
}
