use crate::helpers::spawn_app;
use serde_json::{json, Value};

#[tokio::test]
async fn upserting_a_setting_twice_keeps_the_last_value() {
    let app = spawn_app().await;

    for value in ["first", "second"] {
        let response = app
            .post_json(
                "/settings",
                &json!({ "key": "motto", "value": value, "type": "string" }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = app.get("/settings/motto").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["value"], "second");
    assert_eq!(body["data"]["type"], "string");
    assert_eq!(body["data"]["category"], "general");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM settings WHERE key = 'motto'")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn a_value_that_does_not_match_its_type_is_rejected() {
    let app = spawn_app().await;

    let response = app
        .post_json(
            "/settings",
            &json!({ "key": "max_newsletters_per_batch", "value": "lots", "type": "number" }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn only_public_settings_are_exposed_publicly() {
    let app = spawn_app().await;
    app.post_json(
        "/settings",
        &json!({ "key": "twitter", "value": "@news", "category": "social", "isPublic": true }),
    )
    .await
    .error_for_status()
    .unwrap();
    app.post_json(
        "/settings",
        &json!({ "key": "smtp_password", "value": "hunter2", "category": "security" }),
    )
    .await
    .error_for_status()
    .unwrap();

    let response = app.get("/settings/public").await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"], json!({ "twitter": "@news" }));
}

#[tokio::test]
async fn settings_are_listed_grouped_by_category() {
    let app = spawn_app().await;
    app.post_json("/settings/initialize", &json!({}))
        .await
        .error_for_status()
        .unwrap();

    let response = app.get("/settings").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["general"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["email"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["newsletter"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["seo"].as_array().unwrap().len(), 2);

    let response = app.get("/settings?category=seo&isPublic=true").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"].as_object().unwrap().len(), 1);
    assert_eq!(body["data"]["seo"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn initializing_defaults_keeps_customised_values_unless_asked_to_overwrite() {
    let app = spawn_app().await;
    app.post_json(
        "/settings",
        &json!({ "key": "site_name", "value": "My Site", "isPublic": true }),
    )
    .await
    .error_for_status()
    .unwrap();

    let response = app.post_json("/settings/initialize", &json!({})).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["written"], 8);
    let body: Value = app.get("/settings/site_name").await.json().await.unwrap();
    assert_eq!(body["data"]["value"], "My Site");

    app.post_json("/settings/initialize?overwrite=true", &json!({}))
        .await
        .error_for_status()
        .unwrap();
    let body: Value = app.get("/settings/site_name").await.json().await.unwrap();
    assert_eq!(body["data"]["value"], "Newsletter Website");
}

#[tokio::test]
async fn bulk_updates_report_every_entry() {
    let app = spawn_app().await;

    let response = app
        .put_json(
            "/settings/bulk",
            &json!({ "settings": [
                { "key": "a", "value": 1 },
                { "key": "b", "value": "two", "type": "number" },
                { "key": "c", "value": [1, 2] },
            ]}),
        )
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[2]["success"], true);
    assert_eq!(results[2]["data"]["type"], "array");
}

#[tokio::test]
async fn bulk_updates_require_an_array() {
    let app = spawn_app().await;

    let response = app
        .put_json("/settings/bulk", &json!({ "settings": { "key": "a" } }))
        .await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn unknown_settings_are_a_404() {
    let app = spawn_app().await;

    assert_eq!(app.get("/settings/missing").await.status().as_u16(), 404);
    assert_eq!(app.delete("/settings/missing").await.status().as_u16(), 404);
}

#[tokio::test]
async fn a_deleted_setting_is_gone() {
    let app = spawn_app().await;
    app.post_json("/settings", &json!({ "key": "motto", "value": "hi" }))
        .await
        .error_for_status()
        .unwrap();

    assert_eq!(app.delete("/settings/motto").await.status().as_u16(), 200);
    assert_eq!(app.get("/settings/motto").await.status().as_u16(), 404);
}
