//! Tenant context extracted from gateway-set request headers.
//!
//! The gateway authenticates the caller and forwards tenant, user and role.
//! This service trusts those headers and only checks their shape.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Roles allowed to preview, generate and modify invoices.
const BILLING_ROLES: [&str; 2] = ["owner", "manager"];

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Lowercased role name as sent by the gateway.
    pub role: String,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid, role: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id,
            role: role.into().to_ascii_lowercase(),
        }
    }

    pub fn can_manage_billing(&self) -> bool {
        BILLING_ROLES.contains(&self.role.as_str())
    }

    /// Reject callers that may not change billing state.
    pub fn require_manager(&self) -> Result<(), AppError> {
        if self.can_manage_billing() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Role '{}' cannot manage invoices",
                self.role
            )))
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing {} header", name)))
}

fn uuid_header(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let raw = header(parts, name)?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = uuid_header(parts, TENANT_ID_HEADER)?;
        let user_id = uuid_header(parts, USER_ID_HEADER)?;
        let role = header(parts, USER_ROLE_HEADER)?;

        let span = tracing::Span::current();
        span.record("tenant_id", tracing::field::display(tenant_id));
        span.record("user_id", tracing::field::display(user_id));

        Ok(TenantContext::new(tenant_id, user_id, role))
    }
}
