use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::middleware::TenantContext;
use crate::models::{PreviewFilters, PreviewResult};
use crate::services::metrics::{record_operation, OPERATION_DURATION};
use crate::startup::AppState;

/// Project the invoice a generate call would create. Writes nothing.
#[tracing::instrument(
    skip(state, tenant, filters),
    fields(tenant_id = %tenant.tenant_id, client_id = %filters.client_id)
)]
pub async fn preview_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(filters): Json<PreviewFilters>,
) -> Result<Json<PreviewResult>, AppError> {
    tenant.require_manager()?;
    filters.validate()?;

    let timer = OPERATION_DURATION
        .with_label_values(&["preview"])
        .start_timer();
    let result = state.preview.preview(tenant.tenant_id, &filters).await;
    timer.observe_duration();
    record_operation("preview", &result);

    Ok(Json(result?))
}
