//! Test helper module for timebilling-service integration tests.
//!
//! `TestApp` runs the real router on a random port over the in-memory store,
//! so seeded reference data and claimed entries can be inspected directly.

#![allow(dead_code)]

use chrono::NaiveDate;
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::Secret;
use serde::Serialize;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use service_core::utils::sign_payload;
use std::sync::Arc;
use timebilling_service::config::{
    BillingConfig, DatabaseConfig, StorageBackend, TimeBillingConfig, WebhookConfig,
};
use timebilling_service::services::{
    BillingStore, InMemoryBillingStore, InvoiceNotifier, MockInvoiceNotifier,
};
use timebilling_service::startup::Application;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

pub fn test_config() -> TimeBillingConfig {
    TimeBillingConfig {
        common: CoreConfig::with_port(0),
        service_name: "timebilling-service-test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        storage: StorageBackend::Memory,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
        },
        billing: BillingConfig {
            default_tax_rate: dec!(18.00),
            payment_terms_days: 15,
            invoice_number_attempts: 10,
        },
        notification_service_url: None,
        webhook: WebhookConfig {
            secret: Secret::new(WEBHOOK_SECRET.to_string()),
        },
    }
}

pub fn d(value: &str) -> NaiveDate {
    value.parse().expect("valid date")
}

/// One client with one project, two rated contributors and March entries:
/// Alice 3h at 50, Bob 2h at 80.
pub struct Seeded {
    pub client_id: Uuid,
    pub project_id: Uuid,
    pub alice: Uuid,
    pub bob: Uuid,
    pub entries: Vec<Uuid>,
}

/// Run the router over `store` on a random port and wait until it answers.
/// Returns the base address and port.
pub async fn spawn_server(
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn InvoiceNotifier>,
) -> (String, u16) {
    let app = Application::build_with(test_config(), store, notifier)
        .await
        .expect("Failed to build test application");

    let http_port = app.http_port();
    let http_address = format!("http://127.0.0.1:{}", http_port);

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    // Wait for HTTP server to be ready by polling health endpoint
    let client = Client::new();
    let health_url = format!("{}/health", http_address);
    for _ in 0..50 {
        if client.get(&health_url).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    (http_address, http_port)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub store: Arc<InMemoryBillingStore>,
    pub notifier: Arc<MockInvoiceNotifier>,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub client: Client,
}

impl TestApp {
    /// Spawn a new test application on a random port.
    pub async fn spawn() -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        let notifier = Arc::new(MockInvoiceNotifier::new());

        let (http_address, http_port) = spawn_server(store.clone(), notifier.clone()).await;
        let client = Client::new();

        TestApp {
            http_address,
            http_port,
            store,
            notifier,
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            client,
        }
    }

    pub fn seed(&self) -> Seeded {
        let client_id = self.store.add_client(self.tenant_id, "Acme Corp");
        let project_id = self.store.add_project(self.tenant_id, client_id, "Website");
        let alice =
            self.store
                .add_contributor(self.tenant_id, "Alice", "alice@example.com", Some(dec!(50)));
        let bob = self
            .store
            .add_contributor(self.tenant_id, "Bob", "bob@example.com", Some(dec!(80)));
        let entries = vec![
            self.store.add_entry(
                self.tenant_id,
                alice,
                project_id,
                None,
                d("2026-03-05"),
                3,
                true,
                Some("Landing page"),
            ),
            self.store.add_entry(
                self.tenant_id,
                bob,
                project_id,
                None,
                d("2026-03-06"),
                2,
                true,
                None,
            ),
        ];
        Seeded {
            client_id,
            project_id,
            alice,
            bob,
            entries,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    fn with_role(&self, request: reqwest::RequestBuilder, role: &str) -> reqwest::RequestBuilder {
        request
            .header("X-Tenant-ID", self.tenant_id.to_string())
            .header("X-User-ID", self.user_id.to_string())
            .header("X-User-Role", role)
    }

    pub async fn post_as<T: Serialize + ?Sized>(&self, path: &str, body: &T, role: &str) -> Response {
        self.with_role(self.client.post(self.url(path)), role)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Response {
        self.post_as(path, body, "manager").await
    }

    pub async fn get(&self, path: &str) -> Response {
        self.with_role(self.client.get(self.url(path)), "member")
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Response {
        self.with_role(self.client.patch(self.url(path)), "manager")
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Response {
        self.with_role(self.client.put(self.url(path)), "manager")
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.with_role(self.client.delete(self.url(path)), "owner")
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Sends `body` to the payment webhook signed with the test secret.
    pub async fn post_signed_webhook(&self, body: &Value) -> Response {
        let raw = body.to_string();
        let signature = sign_payload(WEBHOOK_SECRET, raw.as_bytes()).expect("signature");
        self.client
            .post(self.url("/webhooks/payments"))
            .header("content-type", "application/json")
            .header("X-Payment-Signature", signature)
            .body(raw)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Generate a draft for the seeded March period and return its id.
    pub async fn generate_draft(&self, seeded: &Seeded) -> Uuid {
        let response = self
            .post("/api/v1/invoices/generate", &march_request(seeded, true))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["invoice_id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("invoice_id in response")
    }

    pub async fn set_status(&self, invoice_id: Uuid, status: &str) -> Response {
        self.patch(
            &format!("/api/v1/invoices/{}/status", invoice_id),
            &json!({ "status": status }),
        )
        .await
    }
}

/// Preview filters for all of March 2026.
pub fn march_filters(seeded: &Seeded) -> Value {
    json!({
        "client_id": seeded.client_id,
        "from_date": "2026-03-01",
        "to_date": "2026-03-31"
    })
}

pub fn march_request(seeded: &Seeded, confirmed: bool) -> Value {
    let mut body = march_filters(seeded);
    body["confirmed"] = json!(confirmed);
    body
}

/// Decimal fields are serialized as strings.
pub fn money(value: &Value) -> Decimal {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("decimal string")
}
