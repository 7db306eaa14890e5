//! Downstream notification of invoice status changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use service_core::error::AppError;
use service_core::observability::TracedClientExt;
use uuid::Uuid;

use crate::models::{Invoice, InvoiceStatus};

/// Tells an invoice's creator that its status changed.
#[async_trait]
pub trait InvoiceNotifier: Send + Sync {
    /// `actor_id` is `None` when the change came from a payment webhook.
    async fn status_changed(
        &self,
        invoice: &Invoice,
        previous: InvoiceStatus,
        actor_id: Option<Uuid>,
    ) -> Result<(), AppError>;
}

#[derive(Debug, Serialize)]
struct StatusChangedNotification<'a> {
    tenant_id: Uuid,
    recipient_user_id: Uuid,
    template: &'static str,
    invoice_id: Uuid,
    invoice_number: &'a str,
    previous_status: InvoiceStatus,
    status: InvoiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed_by: Option<Uuid>,
}

/// Posts to the notification service over HTTP, propagating trace context.
pub struct HttpInvoiceNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInvoiceNotifier {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/notifications", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl InvoiceNotifier for HttpInvoiceNotifier {
    #[tracing::instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id))]
    async fn status_changed(
        &self,
        invoice: &Invoice,
        previous: InvoiceStatus,
        actor_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        let body = StatusChangedNotification {
            tenant_id: invoice.tenant_id,
            recipient_user_id: invoice.created_by,
            template: "invoice_status_changed",
            invoice_id: invoice.invoice_id,
            invoice_number: &invoice.invoice_number,
            previous_status: previous,
            status: invoice.status,
            changed_by: actor_id,
        };

        let response = self
            .client
            .traced_post(&self.endpoint)
            .header("X-Tenant-ID", &invoice.tenant_id.to_string())
            .json(&body)
            .send(None)
            .await
            .map_err(|e| AppError::BadGateway(format!("Notification request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::BadGateway(format!(
                "Notification service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// A notification recorded by [`MockInvoiceNotifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentNotification {
    pub invoice_id: Uuid,
    pub previous: InvoiceStatus,
    pub status: InvoiceStatus,
    pub actor_id: Option<Uuid>,
}

/// Logs instead of sending. Used when no notification service is configured.
#[derive(Default)]
pub struct MockInvoiceNotifier {
    sent_count: AtomicU64,
    last: Mutex<Option<SentNotification>>,
}

impl MockInvoiceNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<SentNotification> {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl InvoiceNotifier for MockInvoiceNotifier {
    async fn status_changed(
        &self,
        invoice: &Invoice,
        previous: InvoiceStatus,
        actor_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        self.sent_count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(SentNotification {
            invoice_id: invoice.invoice_id,
            previous,
            status: invoice.status,
            actor_id,
        });

        tracing::info!(
            invoice_id = %invoice.invoice_id,
            recipient = %invoice.created_by,
            from = %previous,
            to = %invoice.status,
            "Mock invoice notification sent"
        );
        Ok(())
    }
}
