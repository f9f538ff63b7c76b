//! Merge group integration tests: creation rules, group-atomic submission
//! and verification, ungrouping.

mod common;

use common::TestApp;
use serde_json::{json, Value};
use serial_test::serial;
use uuid::Uuid;

struct MergeFixture {
    item_a: Uuid,
    item_b: Uuid,
}

async fn seed_two_items(app: &TestApp) -> MergeFixture {
    let kol_id = app.seed_kol("香菜阿姨", None).await;
    let quotation_id = app.seed_quotation("春季開箱企劃", "signed").await;
    let item_a = app
        .seed_item(quotation_id, Some(kol_id), "短影音", 1, 30_000, 10_000)
        .await;
    let item_b = app
        .seed_item(quotation_id, Some(kol_id), "貼文", 1, 8_000, 3_000)
        .await;
    MergeFixture { item_a, item_b }
}

async fn create_group(app: &TestApp, items: &[Uuid]) -> reqwest::Response {
    app.post_as(
        "/merge-groups",
        Some(&json!({ "quotationItemIds": items })),
    )
    .await
}

#[tokio::test]
#[serial]
#[ignore]
async fn group_creation_assigns_single_leader_and_color() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    let response = create_group(&app, &[fx.item_a, fx.item_b]).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert!(body["mergeColor"].as_str().unwrap().starts_with('#'));

    let leaders: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payment_requests WHERE merge_group_id IS NOT NULL AND is_merge_leader",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(leaders, 1);

    let members: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payment_requests WHERE merge_group_id IS NOT NULL")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(members, 2);
}

#[tokio::test]
#[serial]
#[ignore]
async fn group_rejects_mixed_kols_and_single_items() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    let other_kol = app.seed_kol("理財小哥", None).await;
    let quotation_id = app.seed_quotation("夏季導購", "signed").await;
    let other_item = app
        .seed_item(quotation_id, Some(other_kol), "直播", 1, 50_000, 20_000)
        .await;

    let response = create_group(&app, &[fx.item_a, other_item]).await;
    assert_eq!(response.status(), 400);

    let response = create_group(&app, &[fx.item_a]).await;
    assert_eq!(response.status(), 422);

    // Nothing was persisted by the failed attempts.
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_requests")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
#[serial]
#[ignore]
async fn grouped_items_must_be_submitted_together() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    create_group(&app, &[fx.item_a, fx.item_b]).await;

    // Partial selection is refused.
    let response = app
        .post_as(
            "/payment-requests",
            Some(&json!({
                "items": [{ "quotationItemId": fx.item_a, "costAmount": 10_000 }]
            })),
        )
        .await;
    assert_eq!(response.status(), 400);

    // Whole group goes through, and followers persist the leader's invoice.
    let response = app
        .post_as(
            "/payment-requests",
            Some(&json!({
                "items": [
                    { "quotationItemId": fx.item_a, "costAmount": 10_000,
                      "invoiceNumber": "AB-12345678" },
                    { "quotationItemId": fx.item_b, "costAmount": 3_000 },
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), 201);

    let invoices: Vec<Option<String>> = sqlx::query_scalar(
        "SELECT invoice_number FROM payment_requests WHERE merge_group_id IS NOT NULL",
    )
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(invoices.len(), 2);
    assert!(invoices
        .iter()
        .all(|i| i.as_deref() == Some("AB-12345678")));
}

#[tokio::test]
#[serial]
#[ignore]
async fn verification_acts_on_the_whole_group() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    create_group(&app, &[fx.item_a, fx.item_b]).await;
    app.post_as(
        "/payment-requests",
        Some(&json!({
            "items": [
                { "quotationItemId": fx.item_a, "costAmount": 10_000,
                  "invoiceNumber": "AB-12345678" },
                { "quotationItemId": fx.item_b, "costAmount": 3_000 },
            ]
        })),
    )
    .await;

    let follower_id: Uuid = sqlx::query_scalar(
        "SELECT payment_request_id FROM payment_requests WHERE quotation_item_id = $1",
    )
    .bind(fx.item_b)
    .fetch_one(&app.pool)
    .await
    .unwrap();

    // Approving any member approves every member.
    let response = app
        .post_as(&format!("/payment-requests/{}/approve", follower_id), None)
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["paymentRequestIds"].as_array().unwrap().len(), 2);
    assert_eq!(app.request_status(fx.item_a).await, "approved");
    assert_eq!(app.request_status(fx.item_b).await, "approved");
}

#[tokio::test]
#[serial]
#[ignore]
async fn confirming_a_merged_group_snapshots_every_member() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    create_group(&app, &[fx.item_a, fx.item_b]).await;
    app.post_as(
        "/payment-requests",
        Some(&json!({
            "items": [
                { "quotationItemId": fx.item_a, "costAmount": 10_000,
                  "invoiceNumber": "AB-12345678" },
                { "quotationItemId": fx.item_b, "costAmount": 3_000 },
            ]
        })),
    )
    .await;

    let leader_id: Uuid = sqlx::query_scalar(
        "SELECT payment_request_id FROM payment_requests WHERE quotation_item_id = $1",
    )
    .bind(fx.item_a)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    app.post_as(&format!("/payment-requests/{}/approve", leader_id), None)
        .await;

    let response = app.post_as("/confirmations", None).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    // Snapshot amounts are price x quantity: 30000 + 8000.
    assert_eq!(body["totalAmount"], 38_000);
    assert_eq!(body["totalItems"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    assert_eq!(app.request_status(fx.item_a).await, "confirmed");
    assert_eq!(app.request_status(fx.item_b).await, "confirmed");
}

#[tokio::test]
#[serial]
#[ignore]
async fn ungroup_clears_followers_but_keeps_leader_fields() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    let body: Value = create_group(&app, &[fx.item_a, fx.item_b])
        .await
        .json()
        .await
        .unwrap();
    let group_id = body["mergeGroupId"].as_str().unwrap().to_string();

    app.post_as(
        "/payment-requests",
        Some(&json!({
            "items": [
                { "quotationItemId": fx.item_a, "costAmount": 10_000,
                  "invoiceNumber": "AB-12345678" },
                { "quotationItemId": fx.item_b, "costAmount": 3_000 },
            ]
        })),
    )
    .await;

    let response = app
        .client
        .delete(format!("{}/merge-groups/{}", app.address, group_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let rows: Vec<(bool, Option<Uuid>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT pr.is_merge_leader, pr.merge_group_id, pr.invoice_number
        FROM payment_requests pr
        WHERE pr.quotation_item_id IN ($1, $2)
        ORDER BY pr.quotation_item_id = $1 DESC
        "#,
    )
    .bind(fx.item_a)
    .bind(fx.item_b)
    .fetch_all(&app.pool)
    .await
    .unwrap();

    for (_, group, _) in &rows {
        assert_eq!(*group, None);
    }
    // The first selected item led the group and keeps its invoice; the
    // follower's mirrored copy is wiped.
    assert_eq!(rows[0].2.as_deref(), Some("AB-12345678"));
    assert_eq!(rows[1].2, None);
}

#[tokio::test]
#[serial]
#[ignore]
async fn follower_attachment_uploads_land_on_the_leader() {
    let app = TestApp::spawn().await;
    app.reset().await;

    let fx = seed_two_items(&app).await;
    create_group(&app, &[fx.item_a, fx.item_b]).await;

    let follower_id: Uuid = sqlx::query_scalar(
        "SELECT payment_request_id FROM payment_requests WHERE quotation_item_id = $1",
    )
    .bind(fx.item_b)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    let leader_id: Uuid = sqlx::query_scalar(
        "SELECT payment_request_id FROM payment_requests WHERE quotation_item_id = $1",
    )
    .bind(fx.item_a)
    .fetch_one(&app.pool)
    .await
    .unwrap();

    let response = app
        .post_as(
            &format!("/payment-requests/{}/attachments", follower_id),
            Some(&json!({
                "name": "receipt.jpg",
                "url": "https://storage.example/receipt.jpg",
                "path": "attachments/receipt.jpg",
                "size": 2048,
            })),
        )
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["paymentRequestId"], json!(leader_id));

    let stored: Option<String> = sqlx::query_scalar(
        "SELECT attachment_file_path FROM payment_requests WHERE payment_request_id = $1",
    )
    .bind(leader_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert!(stored.unwrap().contains("receipt.jpg"));

    let follower_stored: Option<String> = sqlx::query_scalar(
        "SELECT attachment_file_path FROM payment_requests WHERE payment_request_id = $1",
    )
    .bind(follower_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(follower_stored, None);
}
