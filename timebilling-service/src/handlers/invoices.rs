//! Invoice generation and lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::billing::{InvoicePage, ManualInvoiceItem};
use crate::middleware::TenantContext;
use crate::models::{
    GenerateRequest, GenerationResult, InvoiceDetail, InvoiceStatus, ListInvoicesFilter,
};
use crate::services::metrics::{record_operation, OPERATION_DURATION};
use crate::startup::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
    pub page_size: Option<i64>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: InvoiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceItemsRequest {
    pub items: Vec<ManualInvoiceItem>,
}

#[tracing::instrument(
    skip(state, tenant, request),
    fields(tenant_id = %tenant.tenant_id, client_id = %request.filters.client_id)
)]
pub async fn generate_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerationResult>), AppError> {
    tenant.require_manager()?;
    request.validate()?;

    let timer = OPERATION_DURATION
        .with_label_values(&["generate"])
        .start_timer();
    let result = state
        .generator
        .generate(tenant.tenant_id, tenant.user_id, &request)
        .await;
    timer.observe_duration();
    record_operation("generate", &result);

    Ok((StatusCode::CREATED, Json(result?)))
}

#[tracing::instrument(skip(state, tenant), fields(tenant_id = %tenant.tenant_id))]
pub async fn list_invoices(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<InvoicePage>, AppError> {
    let filter = ListInvoicesFilter {
        status: query.status,
        client_id: query.client_id,
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        page_token: query.page_token,
    };
    let page = state.lifecycle.list(tenant.tenant_id, filter).await?;
    Ok(Json(page))
}

#[tracing::instrument(skip(state, tenant), fields(tenant_id = %tenant.tenant_id, invoice_id = %invoice_id))]
pub async fn get_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    let detail = state.lifecycle.get(tenant.tenant_id, invoice_id).await?;
    Ok(Json(detail))
}

#[tracing::instrument(
    skip(state, tenant, request),
    fields(tenant_id = %tenant.tenant_id, invoice_id = %invoice_id, status = %request.status)
)]
pub async fn update_invoice_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<InvoiceDetail>, AppError> {
    tenant.require_manager()?;

    let result = state
        .lifecycle
        .update_status(tenant.tenant_id, invoice_id, request.status, Some(tenant.user_id))
        .await;
    record_operation("update_status", &result);

    Ok(Json(result?))
}

#[tracing::instrument(
    skip(state, tenant, request),
    fields(tenant_id = %tenant.tenant_id, invoice_id = %invoice_id)
)]
pub async fn replace_invoice_items(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<ReplaceItemsRequest>,
) -> Result<Json<InvoiceDetail>, AppError> {
    tenant.require_manager()?;

    let result = state
        .lifecycle
        .replace_items(tenant.tenant_id, invoice_id, request.items)
        .await;
    record_operation("replace_items", &result);

    Ok(Json(result?))
}

#[tracing::instrument(skip(state, tenant), fields(tenant_id = %tenant.tenant_id, invoice_id = %invoice_id))]
pub async fn delete_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tenant.require_manager()?;

    let result = state.lifecycle.delete(tenant.tenant_id, invoice_id).await;
    record_operation("delete", &result);
    result?;

    Ok(StatusCode::NO_CONTENT)
}
