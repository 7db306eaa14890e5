//! Payment provider webhooks.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::error::AppError;
use service_core::utils::verify_payload_signature;
use uuid::Uuid;

use crate::models::InvoiceStatus;
use crate::startup::AppState;

pub const PAYMENT_SIGNATURE_HEADER: &str = "X-Payment-Signature";

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: PaymentWebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentWebhookPayload {
    pub payment: Option<PaymentEntityWrapper>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntityWrapper {
    pub entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub notes: PaymentNotes,
}

/// Merchant notes attached when the payment link was created.
#[derive(Debug, Default, Deserialize)]
pub struct PaymentNotes {
    pub tenant_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
}

/// Mark an invoice PAID when its payment is captured.
///
/// Unknown events, unknown invoices and rejected transitions are acknowledged
/// with 200 so the provider stops retrying them. Storage failures surface as
/// errors so it retries.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(PAYMENT_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", PAYMENT_SIGNATURE_HEADER);
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = verify_payload_signature(
        state.config.webhook.secret.expose_secret(),
        body.as_bytes(),
        signature,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Webhook signature verification error");
        AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
    })?;

    if !is_valid {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event: PaymentWebhookEvent = serde_json::from_str(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    tracing::info!(event_type = %event.event, "Processing payment webhook");

    match event.event.as_str() {
        "payment.captured" => {
            let Some(wrapper) = event.payload.payment else {
                tracing::warn!("payment.captured without payment entity");
                return Ok(StatusCode::OK);
            };
            let payment = wrapper.entity;

            match (payment.notes.tenant_id, payment.notes.invoice_id) {
                (Some(tenant_id), Some(invoice_id)) => {
                    mark_paid(&state, tenant_id, invoice_id, &payment.id).await?;
                }
                _ => tracing::warn!(
                    payment_id = %payment.id,
                    "Captured payment is not linked to an invoice"
                ),
            }
        }
        other => {
            tracing::debug!(event_type = %other, "Ignoring webhook event");
        }
    }

    Ok(StatusCode::OK)
}

async fn mark_paid(
    state: &AppState,
    tenant_id: Uuid,
    invoice_id: Uuid,
    payment_id: &str,
) -> Result<(), AppError> {
    let result = state
        .lifecycle
        .update_status(tenant_id, invoice_id, InvoiceStatus::Paid, None)
        .await;

    match result {
        Ok(_) => {
            tracing::info!(
                payment_id = %payment_id,
                invoice_id = %invoice_id,
                "Invoice marked paid from webhook"
            );
            Ok(())
        }
        Err(e @ (AppError::BusinessRule(_) | AppError::NotFound(_))) => {
            tracing::warn!(
                payment_id = %payment_id,
                invoice_id = %invoice_id,
                error = %e,
                "Payment captured for an invoice that cannot be marked paid"
            );
            Ok(())
        }
        Err(e @ AppError::Conflict(_)) => {
            // A concurrent writer may already have recorded this payment.
            let current = state.lifecycle.get(tenant_id, invoice_id).await?;
            if current.invoice.status == InvoiceStatus::Paid {
                tracing::info!(invoice_id = %invoice_id, "Invoice already paid");
                Ok(())
            } else {
                Err(e)
            }
        }
        Err(e) => {
            tracing::error!(
                payment_id = %payment_id,
                invoice_id = %invoice_id,
                error = %e,
                "Failed to mark invoice paid from webhook"
            );
            Err(e)
        }
    }
}
