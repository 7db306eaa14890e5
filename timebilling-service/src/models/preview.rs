//! Request and result shapes for invoice preview and generation.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// How unbilled entries are folded into line items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupBy {
    #[default]
    ByContributor,
    ByWorkItem,
}

fn default_true() -> bool {
    true
}

/// Filters shared by preview and generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PreviewFilters {
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    #[serde(default = "default_true")]
    pub billable_only: bool,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub include_descriptions: bool,
}

/// Generate request: the preview filters plus the confirmation gate.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub filters: PreviewFilters,
    pub tax_rate: Option<Decimal>,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

/// One projected invoice line. Exactly one of `user_id` / `work_item_id` is set
/// except for the no-task bucket, which has neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewLineItem {
    pub description: String,
    pub minutes: i64,
    pub hours: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A contributor whose rate blocks generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingRateUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub message: String,
}

/// Read-only projection of the invoice a generate call would create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewResult {
    pub client_id: Uuid,
    pub client_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub total_minutes: i64,
    pub total_hours: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub line_items: Vec<PreviewLineItem>,
    pub missing_rate_users: Vec<MissingRateUser>,
    pub entries_count: usize,
    pub can_generate: bool,
    pub message: String,
    /// Entries the generator must claim. Never exposed to callers.
    #[serde(skip)]
    pub entry_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub total: Decimal,
    pub entries_billed: usize,
    pub message: String,
}
