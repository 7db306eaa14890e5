use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::billing::BillingSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct TimeBillingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
    pub notification_service_url: Option<String>,
    pub webhook: WebhookConfig,
}

/// Where invoices and time entries are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Process-local store for development; nothing survives a restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown STORAGE_BACKEND '{}', expected postgres or memory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub default_tax_rate: Decimal,
    pub payment_terms_days: i64,
    pub invoice_number_attempts: u32,
}

impl From<&BillingConfig> for BillingSettings {
    fn from(config: &BillingConfig) -> Self {
        BillingSettings {
            default_tax_rate: config.default_tax_rate,
            payment_terms_days: config.payment_terms_days,
            invoice_number_attempts: config.invoice_number_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret for `X-Payment-Signature`.
    pub secret: Secret<String>,
}

impl TimeBillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let storage: StorageBackend = get_env("STORAGE_BACKEND", Some("postgres"), false)?.parse()?;
        let database_url = match storage {
            StorageBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
            StorageBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let defaults = BillingSettings::default();

        Ok(TimeBillingConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("timebilling-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            storage,
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            billing: BillingConfig {
                default_tax_rate: parse_env("BILLING_DEFAULT_TAX_RATE", defaults.default_tax_rate)?,
                payment_terms_days: parse_env(
                    "BILLING_PAYMENT_TERMS_DAYS",
                    defaults.payment_terms_days,
                )?,
                invoice_number_attempts: parse_env(
                    "BILLING_INVOICE_NUMBER_ATTEMPTS",
                    defaults.invoice_number_attempts,
                )?,
            },
            notification_service_url: env::var("NOTIFICATION_SERVICE_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            webhook: WebhookConfig {
                secret: Secret::new(get_env(
                    "PAYMENT_WEBHOOK_SECRET",
                    Some("dev-webhook-secret"),
                    is_prod,
                )?),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}
