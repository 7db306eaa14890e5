//! Draft invoice generation integration tests.

mod common;

use common::{march_filters, march_request, money, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn unconfirmed_generation_is_rejected_without_writes() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    let response = app
        .post("/api/v1/invoices/generate", &march_request(&seeded, false))
        .await;

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.store.invoice_count(app.tenant_id), 0);
    assert_eq!(app.store.billed_entry_count(app.tenant_id), 0);
}

#[tokio::test]
async fn generated_draft_matches_preview() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    let preview: Value = app
        .post("/api/v1/invoices/preview", &march_filters(&seeded))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    let response = app
        .post("/api/v1/invoices/generate", &march_request(&seeded, true))
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.expect("Failed to parse JSON");

    assert_eq!(money(&body["total"]), money(&preview["total"]));
    assert_eq!(body["entries_billed"], 2);
    let number = body["invoice_number"].as_str().expect("invoice number");
    assert!(number.starts_with("INV-"));
    assert_eq!(number.len(), "INV-20260301-000000".len());
    assert_eq!(
        body["message"],
        format!("Invoice {} created with 2 time entries", number)
    );

    let invoice_id = Uuid::parse_str(body["invoice_id"].as_str().unwrap()).unwrap();
    for entry_id in &seeded.entries {
        let entry = app.store.entry(*entry_id).expect("entry");
        assert_eq!(entry.billed_invoice_id, Some(invoice_id));
        assert!(entry.billed_at.is_some());
    }

    let detail: Value = app
        .get(&format!("/api/v1/invoices/{}", invoice_id))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(detail["status"], "DRAFT");
    assert_eq!(detail["created_by"], app.user_id.to_string());
    assert_eq!(money(&detail["subtotal"]), dec!(310.00));
    assert_eq!(money(&detail["tax_amount"]), dec!(55.80));
    assert_eq!(detail["items"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn tax_override_applies_to_generated_draft() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    let mut request = march_request(&seeded, true);
    request["tax_rate"] = json!("5.00");
    let body: Value = app
        .post("/api/v1/invoices/generate", &request)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(money(&body["total"]), dec!(325.50));
}

#[tokio::test]
async fn out_of_range_tax_override_is_rejected() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    let mut request = march_request(&seeded, true);
    request["tax_rate"] = json!("150");
    let response = app.post("/api/v1/invoices/generate", &request).await;

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.store.invoice_count(app.tenant_id), 0);
}

#[tokio::test]
async fn missing_rate_blocks_generation() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();
    app.store.set_hourly_rate(seeded.alice, Some(dec!(0)));

    let response = app
        .post("/api/v1/invoices/generate", &march_request(&seeded, true))
        .await;

    assert_eq!(response.status().as_u16(), 422);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("no hourly rate configured"));
    assert_eq!(app.store.billed_entry_count(app.tenant_id), 0);
}

#[tokio::test]
async fn entries_are_billed_only_once() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    app.generate_draft(&seeded).await;
    let response = app
        .post("/api/v1/invoices/generate", &march_request(&seeded, true))
        .await;

    assert_eq!(response.status().as_u16(), 422);
    assert_eq!(app.store.invoice_count(app.tenant_id), 1);
    assert_eq!(app.store.billed_entry_count(app.tenant_id), 2);
}

#[tokio::test]
async fn notes_are_trimmed_and_item_descriptions_carry_entry_notes() {
    let app = TestApp::spawn().await;
    let seeded = app.seed();

    let mut request = march_request(&seeded, true);
    request["notes"] = json!("  Thanks for your business  ");
    request["include_descriptions"] = json!(true);
    let body: Value = app
        .post("/api/v1/invoices/generate", &request)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    let detail: Value = app
        .get(&format!(
            "/api/v1/invoices/{}",
            body["invoice_id"].as_str().unwrap()
        ))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(detail["notes"], "Thanks for your business");
    assert_eq!(detail["items"][0]["description"], "Services – Alice (Landing page)");
    assert_eq!(detail["items"][1]["description"], "Services – Bob");
}
