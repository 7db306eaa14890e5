//! Human-readable invoice numbers: `INV-{yyyyMMdd}-{6 random digits}`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use service_core::error::AppError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-tenant uniqueness check for candidate numbers.
#[async_trait]
pub trait InvoiceNumberRegistry: Send + Sync {
    async fn invoice_number_exists(&self, tenant_id: Uuid, number: &str) -> Result<bool, AppError>;
}

#[derive(Debug, Clone, Copy)]
pub struct InvoiceNumberAllocator {
    max_attempts: u32,
}

impl InvoiceNumberAllocator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Draw random candidates until one is free for the tenant.
    ///
    /// The unique index on `(tenant_id, invoice_number)` is still the final
    /// arbiter; this only makes a collision at insert time unlikely. A number
    /// taken between this check and the insert fails the whole generation
    /// with a conflict (409). Generation is not retried.
    pub async fn allocate<R>(
        &self,
        registry: &R,
        tenant_id: Uuid,
        date: NaiveDate,
    ) -> Result<String, AppError>
    where
        R: InvoiceNumberRegistry + ?Sized,
    {
        self.allocate_from(registry, tenant_id, || random_candidate(date))
            .await
    }

    async fn allocate_from<R, F>(
        &self,
        registry: &R,
        tenant_id: Uuid,
        mut next_candidate: F,
    ) -> Result<String, AppError>
    where
        R: InvoiceNumberRegistry + ?Sized,
        F: FnMut() -> String + Send,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = next_candidate();
            if !registry.invoice_number_exists(tenant_id, &candidate).await? {
                debug!(attempt, invoice_number = %candidate, "Allocated invoice number");
                return Ok(candidate);
            }
            warn!(attempt, invoice_number = %candidate, "Invoice number collision");
        }

        Err(AppError::InternalError(anyhow::anyhow!(
            "Could not allocate a unique invoice number after {} attempts",
            self.max_attempts
        )))
    }
}

fn random_candidate(date: NaiveDate) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("INV-{}-{:06}", date.format("%Y%m%d"), suffix)
}
