use crate::helpers::spawn_app;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn submission(email: &str) -> Value {
    json!({
        "firstName": "Grace",
        "lastName": "Hopper",
        "email": email,
        "message": "I'd like to feature your photos in our magazine.",
        "organization": "Navy",
    })
}

#[tokio::test]
async fn submitting_a_contact_form_stores_it_and_acknowledges_by_email() {
    let app = spawn_app().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let response = app
        .post_json("/contacts", &submission("grace@example.com"))
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "new");
    assert_eq!(body["data"]["fullName"], "Grace Hopper");
}

#[tokio::test]
async fn a_failing_acknowledgement_does_not_lose_the_contact() {
    let app = spawn_app().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.email_server)
        .await;

    let response = app
        .post_json("/contacts", &submission("grace@example.com"))
        .await;

    assert_eq!(response.status().as_u16(), 201);
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn invalid_contact_forms_are_rejected() {
    let app = spawn_app().await;
    let mut empty_message = submission("grace@example.com");
    empty_message["message"] = json!("   ");
    let mut long_message = submission("grace@example.com");
    long_message["message"] = json!("a".repeat(3001));
    let test_cases = vec![
        (submission("not-an-email"), "invalid email"),
        (empty_message, "empty message"),
        (long_message, "message too long"),
        (json!({ "email": "grace@example.com" }), "missing fields"),
    ];

    for (body, description) in test_cases {
        let response = app.post_json("/contacts", &body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            description
        );
    }
}

#[tokio::test]
async fn contacts_can_be_triaged() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    for email in ["grace@example.com", "alan@example.com"] {
        app.post_json("/contacts", &submission(email))
            .await
            .error_for_status()
            .unwrap();
    }
    let body: Value = app.get("/contacts?search=alan").await.json().await.unwrap();
    assert_eq!(body["total"], 1);
    let id = body["data"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .put_json(&format!("/contacts/{id}"), &json!({ "status": "resolved" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app
        .put_json(&format!("/contacts/{id}"), &json!({ "status": "ignored" }))
        .await;
    assert_eq!(response.status().as_u16(), 400);

    let body: Value = app.get("/contacts?status=new").await.json().await.unwrap();
    assert_eq!(body["total"], 1);

    let body: Value = app.get("/contacts/stats").await.json().await.unwrap();
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["byStatus"]["new"], 1);
    assert_eq!(body["data"]["byStatus"]["resolved"], 1);
    assert_eq!(body["data"]["byStatus"]["closed"], 0);
    assert_eq!(body["data"]["monthlyData"][0]["count"], 2);

    assert_eq!(app.delete(&format!("/contacts/{id}")).await.status().as_u16(), 200);
    assert_eq!(app.get(&format!("/contacts/{id}")).await.status().as_u16(), 404);
}
