//! PostgreSQL implementation of [`BillingStore`].

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::store::BillingStore;
use crate::billing::InvoiceNumberRegistry;
use crate::models::{
    Client, Contributor, Invoice, InvoiceItem, InvoiceStatus, InvoiceTotalsUpdate,
    ListInvoicesFilter, NewDraftInvoice, NewInvoiceItem, Project, TimeEntry,
    UnbilledEntryQuery, WorkItem,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "timebilling-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_items(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant_id: Uuid,
        invoice_id: Uuid,
        items: &[NewInvoiceItem],
    ) -> Result<(), AppError> {
        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO invoice_items (item_id, invoice_id, tenant_id, description, quantity, unit_price, amount, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(tenant_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(position as i32)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice item: {}", e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceNumberRegistry for PgBillingStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn invoice_number_exists(&self, tenant_id: Uuid, number: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_number_exists"])
            .start_timer();

        // Soft-deleted invoices keep their number.
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM invoices WHERE tenant_id = $1 AND invoice_number = $2)",
        )
        .bind(tenant_id)
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check invoice number: {}", e))
        })?;

        timer.observe_duration();
        Ok(exists)
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, client_id = %client_id))]
    async fn find_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_client"])
            .start_timer();

        let client = sqlx::query_as::<_, Client>(
            r#"
            SELECT client_id, tenant_id, name
            FROM clients
            WHERE tenant_id = $1 AND client_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        timer.observe_duration();
        Ok(client)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, project_id = %project_id))]
    async fn find_project(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_project"])
            .start_timer();

        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT project_id, tenant_id, client_id, name
            FROM projects
            WHERE tenant_id = $1 AND project_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get project: {}", e)))?;

        timer.observe_duration();
        Ok(project)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, client_id = %client_id))]
    async fn list_client_project_ids(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_client_project_ids"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT project_id
            FROM projects
            WHERE tenant_id = $1 AND client_id = $2 AND deleted_utc IS NULL
            ORDER BY project_id
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list projects: {}", e)))?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self, query), fields(tenant_id = %tenant_id, projects = query.project_ids.len()))]
    async fn list_unbilled_entries(
        &self,
        tenant_id: Uuid,
        query: &UnbilledEntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unbilled_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, TimeEntry>(
            r#"
            SELECT time_entry_id, tenant_id, user_id, project_id, work_item_id, work_date, hours,
                billable, notes, billed_invoice_id, billed_at
            FROM time_entries
            WHERE tenant_id = $1
              AND project_id = ANY($2)
              AND work_date BETWEEN $3 AND $4
              AND ($5 = FALSE OR billable)
              AND billed_invoice_id IS NULL
              AND deleted_utc IS NULL
            ORDER BY work_date, time_entry_id
            "#,
        )
        .bind(tenant_id)
        .bind(&query.project_ids[..])
        .bind(query.from_date)
        .bind(query.to_date)
        .bind(query.billable_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list unbilled entries: {}", e))
        })?;

        timer.observe_duration();
        Ok(entries)
    }

    #[instrument(skip(self, user_ids), fields(tenant_id = %tenant_id, count = user_ids.len()))]
    async fn find_contributors(
        &self,
        tenant_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Contributor>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_contributors"])
            .start_timer();

        let contributors = sqlx::query_as::<_, Contributor>(
            r#"
            SELECT user_id, tenant_id, name, email, hourly_rate
            FROM contributors
            WHERE tenant_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get contributors: {}", e))
        })?;

        timer.observe_duration();
        Ok(contributors)
    }

    #[instrument(skip(self, work_item_ids), fields(tenant_id = %tenant_id, count = work_item_ids.len()))]
    async fn find_work_items(
        &self,
        tenant_id: Uuid,
        work_item_ids: &[Uuid],
    ) -> Result<Vec<WorkItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_work_items"])
            .start_timer();

        let work_items = sqlx::query_as::<_, WorkItem>(
            r#"
            SELECT work_item_id, tenant_id, project_id, title
            FROM work_items
            WHERE tenant_id = $1 AND work_item_id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(work_item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get work items: {}", e)))?;

        timer.observe_duration();
        Ok(work_items)
    }

    /// One transaction: invoice, items, then the conditional claim. A short
    /// claim rolls everything back.
    #[instrument(
        skip(self, draft),
        fields(tenant_id = %draft.tenant_id, invoice_number = %draft.invoice_number, entries = draft.entry_ids.len())
    )]
    async fn create_draft_with_claim(&self, draft: &NewDraftInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_draft_with_claim"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by,
                created_utc, updated_utc
            "#,
        )
        .bind(draft.invoice_id)
        .bind(draft.tenant_id)
        .bind(draft.client_id)
        .bind(draft.project_id)
        .bind(&draft.invoice_number)
        .bind(InvoiceStatus::Draft)
        .bind(draft.issue_date)
        .bind(draft.due_date)
        .bind(draft.subtotal)
        .bind(draft.tax_rate)
        .bind(draft.tax_amount)
        .bind(draft.total)
        .bind(&draft.notes)
        .bind(draft.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number {} is already in use",
                    draft.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        Self::insert_items(&mut tx, draft.tenant_id, draft.invoice_id, &draft.items).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE time_entries
            SET billed_invoice_id = $3, billed_at = NOW()
            WHERE tenant_id = $1
              AND time_entry_id = ANY($2)
              AND billed_invoice_id IS NULL
              AND deleted_utc IS NULL
            "#,
        )
        .bind(draft.tenant_id)
        .bind(&draft.entry_ids[..])
        .bind(draft.invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to claim time entries: {}", e)))?
        .rows_affected();

        if claimed != draft.entry_ids.len() as u64 {
            tx.rollback().await.ok();
            warn!(
                expected = draft.entry_ids.len(),
                claimed = claimed,
                "Time entry claim mismatch, draft rolled back"
            );
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Expected to claim {} time entries but only {} were still unbilled",
                draft.entry_ids.len(),
                claimed
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, claimed = claimed, "Draft invoice persisted");

        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by,
                created_utc, updated_utc
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_items"])
            .start_timer();

        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT item_id, invoice_id, tenant_id, description, quantity, unit_price, amount, sort_order
            FROM invoice_items
            WHERE tenant_id = $1 AND invoice_id = $2 AND deleted_utc IS NULL
            ORDER BY sort_order
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice items: {}", e))
        })?;

        timer.observe_duration();
        Ok(items)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by,
                created_utc, updated_utc
            FROM invoices
            WHERE tenant_id = $1
              AND deleted_utc IS NULL
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR client_id = $3)
              AND ($4::uuid IS NULL OR invoice_id > $4)
            ORDER BY invoice_id
            LIMIT $5
            "#,
        )
        .bind(tenant_id)
        .bind(filter.status)
        .bind(filter.client_id)
        .bind(filter.page_token)
        .bind(filter.page_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        Ok(invoices)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, from = %from, to = %to))]
    async fn update_invoice_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        from: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = $4, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND status = $3 AND deleted_utc IS NULL
            RETURNING invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by,
                created_utc, updated_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice status: {}", e))
        })?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self, items, totals), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn replace_invoice_items(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        items: &[NewInvoiceItem],
        totals: InvoiceTotalsUpdate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_invoice_items"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET subtotal = $3, tax_amount = $4, total = $5, updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2
              AND status NOT IN ('PAID', 'CANCELLED')
              AND deleted_utc IS NULL
            RETURNING invoice_id, tenant_id, client_id, project_id, invoice_number, status,
                issue_date, due_date, subtotal, tax_rate, tax_amount, total, notes, created_by,
                created_utc, updated_utc
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(totals.subtotal)
        .bind(totals.tax_amount)
        .bind(totals.total)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update totals: {}", e)))?;

        let Some(invoice) = invoice else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE invoice_items
            SET deleted_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to remove invoice items: {}", e))
        })?;

        Self::insert_items(&mut tx, tenant_id, invoice_id, items).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(Some(invoice))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn soft_delete_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["soft_delete_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let deleted = sqlx::query(
            r#"
            UPDATE invoices
            SET deleted_utc = NOW(), updated_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND status <> 'PAID' AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice: {}", e)))?
        .rows_affected();

        if deleted == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE invoice_items
            SET deleted_utc = NOW()
            WHERE tenant_id = $1 AND invoice_id = $2 AND deleted_utc IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to delete invoice items: {}", e))
        })?;

        let released = sqlx::query(
            r#"
            UPDATE time_entries
            SET billed_invoice_id = NULL, billed_at = NULL
            WHERE tenant_id = $1 AND billed_invoice_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to release time entries: {}", e))
        })?
        .rows_affected();

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(released_entries = released, "Invoice soft-deleted");
        Ok(true)
    }
}
