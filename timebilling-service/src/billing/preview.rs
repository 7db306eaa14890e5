//! Read-only projection of the invoice a set of filters would produce.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

use super::aggregator::{aggregate, AggregationInput};
use super::rates::resolve_rates;
use super::totals::compute_totals;
use super::{minutes_to_hours, round_money};
use crate::models::{
    Client, GroupBy, PreviewFilters, PreviewResult, Project, UnbilledEntryQuery,
};
use crate::services::BillingStore;

pub const NO_PROJECTS_MESSAGE: &str = "No projects found for this client";
pub const NO_ENTRIES_MESSAGE: &str = "No unbilled time entries found for the selected period";

#[derive(Clone)]
pub struct PreviewEngine {
    store: Arc<dyn BillingStore>,
    default_tax_rate: Decimal,
}

impl PreviewEngine {
    pub fn new(store: Arc<dyn BillingStore>, default_tax_rate: Decimal) -> Self {
        Self {
            store,
            default_tax_rate,
        }
    }

    /// Compute the preview. Never writes; identical inputs over unchanged data
    /// give identical results.
    #[instrument(skip(self, filters), fields(tenant_id = %tenant_id, client_id = %filters.client_id))]
    pub async fn preview(
        &self,
        tenant_id: Uuid,
        filters: &PreviewFilters,
    ) -> Result<PreviewResult, AppError> {
        if filters.from_date > filters.to_date {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "from_date ({}) must be on or before to_date ({})",
                filters.from_date,
                filters.to_date
            )));
        }

        let client = self
            .store
            .find_client(tenant_id, filters.client_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Client {} not found", filters.client_id))
            })?;

        let (project, project_ids) = match filters.project_id {
            Some(project_id) => {
                let project = self
                    .store
                    .find_project(tenant_id, project_id)
                    .await?
                    .filter(|p| p.client_id == client.client_id)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "Project {} not found for client {}",
                            project_id,
                            client.client_id
                        ))
                    })?;
                (Some(project), vec![project_id])
            }
            None => (
                None,
                self.store
                    .list_client_project_ids(tenant_id, client.client_id)
                    .await?,
            ),
        };

        if project_ids.is_empty() {
            return Ok(self.empty(&client, project.as_ref(), filters, NO_PROJECTS_MESSAGE));
        }

        let query = UnbilledEntryQuery {
            project_ids,
            from_date: filters.from_date,
            to_date: filters.to_date,
            billable_only: filters.billable_only,
        };
        let entries = self.store.list_unbilled_entries(tenant_id, &query).await?;
        if entries.is_empty() {
            return Ok(self.empty(&client, project.as_ref(), filters, NO_ENTRIES_MESSAGE));
        }

        let user_ids = distinct(entries.iter().map(|e| e.user_id));
        let contributors = self.store.find_contributors(tenant_id, &user_ids).await?;
        let rates = resolve_rates(&user_ids, &contributors);

        let work_items = match filters.group_by {
            GroupBy::ByWorkItem => {
                let ids = distinct(entries.iter().filter_map(|e| e.work_item_id));
                self.store.find_work_items(tenant_id, &ids).await?
            }
            GroupBy::ByContributor => Vec::new(),
        };

        let line_items = aggregate(
            &AggregationInput {
                entries: &entries,
                rates: &rates,
                contributors: &contributors,
                work_items: &work_items,
                include_descriptions: filters.include_descriptions,
            },
            filters.group_by,
        );
        let totals = compute_totals(line_items.iter().map(|i| i.amount), self.default_tax_rate);
        let total_minutes: i64 = entries.iter().map(|e| e.minutes()).sum();

        let can_generate = rates.missing.is_empty();
        let message = if can_generate {
            format!("Ready to generate invoice for {} time entries", entries.len())
        } else {
            format!(
                "{} team member(s) have no hourly rate configured. Set their rates before generating an invoice.",
                rates.missing.len()
            )
        };

        info!(
            entries = entries.len(),
            line_items = line_items.len(),
            missing_rates = rates.missing.len(),
            subtotal = %totals.subtotal,
            "Invoice preview computed"
        );

        let mut entry_ids: Vec<Uuid> = entries.iter().map(|e| e.time_entry_id).collect();
        entry_ids.sort();

        Ok(PreviewResult {
            client_id: client.client_id,
            client_name: client.name,
            project_id: project.as_ref().map(|p| p.project_id),
            project_name: project.map(|p| p.name),
            from_date: filters.from_date,
            to_date: filters.to_date,
            total_minutes,
            total_hours: minutes_to_hours(total_minutes),
            subtotal: totals.subtotal,
            tax_rate: totals.tax_rate,
            tax_amount: totals.tax_amount,
            total: totals.total,
            line_items,
            missing_rate_users: rates.missing,
            entries_count: entries.len(),
            can_generate,
            message,
            entry_ids,
        })
    }

    fn empty(
        &self,
        client: &Client,
        project: Option<&Project>,
        filters: &PreviewFilters,
        message: &str,
    ) -> PreviewResult {
        let zero = round_money(Decimal::ZERO);
        PreviewResult {
            client_id: client.client_id,
            client_name: client.name.clone(),
            project_id: project.map(|p| p.project_id),
            project_name: project.map(|p| p.name.clone()),
            from_date: filters.from_date,
            to_date: filters.to_date,
            total_minutes: 0,
            total_hours: zero,
            subtotal: zero,
            tax_rate: round_money(self.default_tax_rate),
            tax_amount: zero,
            total: zero,
            line_items: Vec::new(),
            missing_rate_users: Vec::new(),
            entries_count: 0,
            can_generate: false,
            message: message.to_string(),
            entry_ids: Vec::new(),
        }
    }
}

/// Distinct ids in first-seen order.
fn distinct<I: IntoIterator<Item = Uuid>>(ids: I) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryBillingStore;
    use rust_decimal_macros::dec;

    struct Setup {
        store: Arc<InMemoryBillingStore>,
        engine: PreviewEngine,
        tenant_id: Uuid,
        client_id: Uuid,
        project_id: Uuid,
    }

    fn setup() -> Setup {
        let store = Arc::new(InMemoryBillingStore::new());
        let tenant_id = Uuid::new_v4();
        let client_id = store.add_client(tenant_id, "Acme Corp");
        let project_id = store.add_project(tenant_id, client_id, "Website");
        let engine = PreviewEngine::new(store.clone(), dec!(18.00));
        Setup {
            store,
            engine,
            tenant_id,
            client_id,
            project_id,
        }
    }

    fn d(value: &str) -> chrono::NaiveDate {
        value.parse().unwrap()
    }

    fn filters(s: &Setup, group_by: GroupBy) -> PreviewFilters {
        PreviewFilters {
            client_id: s.client_id,
            project_id: None,
            from_date: "2026-03-01".parse().unwrap(),
            to_date: "2026-03-31".parse().unwrap(),
            billable_only: true,
            group_by,
            include_descriptions: false,
        }
    }

    fn seed_two_contributors(s: &Setup) {
        let alice = s
            .store
            .add_contributor(s.tenant_id, "Alice", "alice@example.com", Some(dec!(50)));
        let bob = s
            .store
            .add_contributor(s.tenant_id, "Bob", "bob@example.com", Some(dec!(80)));
        let task = s.store.add_work_item(s.tenant_id, s.project_id, "Checkout flow");
        s.store
            .add_entry(s.tenant_id, alice, s.project_id, Some(task), d("2026-03-05"), 3, true, None);
        s.store
            .add_entry(s.tenant_id, bob, s.project_id, Some(task), d("2026-03-06"), 2, true, None);
    }

    #[tokio::test]
    async fn by_contributor_scenario() {
        let s = setup();
        seed_two_contributors(&s);

        let result = s
            .engine
            .preview(s.tenant_id, &filters(&s, GroupBy::ByContributor))
            .await
            .unwrap();

        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[0].amount, dec!(150.00));
        assert_eq!(result.line_items[1].amount, dec!(160.00));
        assert_eq!(result.subtotal, dec!(310.00));
        assert_eq!(result.tax_amount, dec!(55.80));
        assert_eq!(result.total, dec!(365.80));
        assert_eq!(result.total_minutes, 300);
        assert_eq!(result.entries_count, 2);
        assert_eq!(result.entry_ids.len(), 2);
        assert!(result.can_generate);
        assert_eq!(result.client_name, "Acme Corp");
    }

    #[tokio::test]
    async fn by_work_item_scenario_has_same_totals() {
        let s = setup();
        seed_two_contributors(&s);

        let result = s
            .engine
            .preview(s.tenant_id, &filters(&s, GroupBy::ByWorkItem))
            .await
            .unwrap();

        assert_eq!(result.line_items.len(), 1);
        assert_eq!(result.line_items[0].hours, dec!(5.00));
        assert_eq!(result.line_items[0].unit_price, dec!(62.00));
        assert_eq!(result.line_items[0].amount, dec!(310.00));
        assert_eq!(result.total, dec!(365.80));
    }

    #[tokio::test]
    async fn missing_rate_blocks_generation() {
        let s = setup();
        let carol = s
            .store
            .add_contributor(s.tenant_id, "Carol", "carol@example.com", None);
        s.store
            .add_entry(s.tenant_id, carol, s.project_id, None, d("2026-03-10"), 1, true, None);

        let result = s
            .engine
            .preview(s.tenant_id, &filters(&s, GroupBy::ByContributor))
            .await
            .unwrap();

        assert!(!result.can_generate);
        assert_eq!(result.missing_rate_users.len(), 1);
        assert_eq!(result.missing_rate_users[0].email, "carol@example.com");
        assert!(result.message.contains("no hourly rate"));
    }

    #[tokio::test]
    async fn no_entries_returns_zero_preview() {
        let s = setup();

        let result = s
            .engine
            .preview(s.tenant_id, &filters(&s, GroupBy::ByContributor))
            .await
            .unwrap();

        assert!(!result.can_generate);
        assert_eq!(result.entries_count, 0);
        assert_eq!(result.total.to_string(), "0.00");
        assert_eq!(result.tax_rate.to_string(), "18.00");
        assert_eq!(result.message, NO_ENTRIES_MESSAGE);
    }

    #[tokio::test]
    async fn client_without_projects_returns_zero_preview() {
        let s = setup();
        let other = s.store.add_client(s.tenant_id, "Empty Ltd");
        let mut f = filters(&s, GroupBy::ByContributor);
        f.client_id = other;

        let result = s.engine.preview(s.tenant_id, &f).await.unwrap();

        assert!(!result.can_generate);
        assert_eq!(result.message, NO_PROJECTS_MESSAGE);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let s = setup();
        let mut f = filters(&s, GroupBy::ByContributor);
        f.from_date = "2026-04-01".parse().unwrap();

        let result = s.engine.preview(s.tenant_id, &f).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn project_of_another_client_is_not_found() {
        let s = setup();
        let other_client = s.store.add_client(s.tenant_id, "Globex");
        let foreign = s.store.add_project(s.tenant_id, other_client, "Intranet");
        let mut f = filters(&s, GroupBy::ByContributor);
        f.project_id = Some(foreign);

        let result = s.engine.preview(s.tenant_id, &f).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn other_tenants_client_is_not_found() {
        let s = setup();

        let result = s
            .engine
            .preview(Uuid::new_v4(), &filters(&s, GroupBy::ByContributor))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn preview_is_idempotent_and_read_only() {
        let s = setup();
        seed_two_contributors(&s);
        let f = filters(&s, GroupBy::ByWorkItem);

        let first = s.engine.preview(s.tenant_id, &f).await.unwrap();
        let second = s.engine.preview(s.tenant_id, &f).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(s.store.billed_entry_count(s.tenant_id), 0);
    }

    #[tokio::test]
    async fn non_billable_entries_follow_flag() {
        let s = setup();
        let alice = s
            .store
            .add_contributor(s.tenant_id, "Alice", "alice@example.com", Some(dec!(50)));
        s.store
            .add_entry(s.tenant_id, alice, s.project_id, None, d("2026-03-05"), 2, false, None);

        let billable_only = s
            .engine
            .preview(s.tenant_id, &filters(&s, GroupBy::ByContributor))
            .await
            .unwrap();
        assert_eq!(billable_only.entries_count, 0);

        let mut all = filters(&s, GroupBy::ByContributor);
        all.billable_only = false;
        let everything = s.engine.preview(s.tenant_id, &all).await.unwrap();
        assert_eq!(everything.entries_count, 1);
        assert_eq!(everything.subtotal, dec!(100.00));
    }
}
