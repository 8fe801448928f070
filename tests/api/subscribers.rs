use crate::helpers::spawn_app;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn subscribe_returns_201_and_sends_a_confirmation_email() {
    // Arrange
    let app = spawn_app().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // Act
    let response = app
        .post_subscribe(&json!({
            "email": "ursula_le_guin@gmail.com",
            "firstName": "Ursula",
            "lastName": "Le Guin",
            "interests": ["photos", "press"],
        }))
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["isActive"], true);
    assert_eq!(body["data"]["isVerified"], false);
    assert_eq!(body["data"]["fullName"], "Ursula Le Guin");
    assert!(body["data"].get("unsubscribeToken").is_none());
}

#[tokio::test]
async fn subscribe_persists_the_new_subscriber_with_default_interests() {
    let app = spawn_app().await;
    app.accept_all_emails().await;

    app.post_subscribe(&json!({ "email": "ursula_le_guin@gmail.com" }))
        .await
        .error_for_status()
        .unwrap();

    let (email, interests, source): (String, Vec<String>, String) =
        sqlx::query_as("SELECT email, interests, source FROM subscribers")
            .fetch_one(&app.db_pool)
            .await
            .expect("Failed to fetch saved subscription.");
    assert_eq!(email, "ursula_le_guin@gmail.com");
    assert_eq!(interests, vec!["general"]);
    assert_eq!(source, "website");
}

#[tokio::test]
async fn subscribe_still_succeeds_when_the_confirmation_email_fails() {
    let app = spawn_app().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let response = app
        .post_subscribe(&json!({ "email": "ursula_le_guin@gmail.com" }))
        .await;

    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn subscribe_returns_a_400_when_data_is_invalid() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({ "email": "" }), "empty email"),
        (json!({ "email": "definitely-not-an-email" }), "invalid email"),
        (json!({ "firstName": "Ursula" }), "missing email"),
        (
            json!({ "email": "ursula@example.com", "interests": ["gossip"] }),
            "unknown interest",
        ),
        (
            json!({ "email": "ursula@example.com", "firstName": "<script>" }),
            "markup in the name",
        ),
    ];

    for (body, description) in test_cases {
        let response = app.post_subscribe(&body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            description
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false, "{description}");
    }
}

#[tokio::test]
async fn subscribing_twice_with_an_active_email_is_rejected() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    let body = json!({ "email": "ursula@example.com" });

    app.post_subscribe(&body).await.error_for_status().unwrap();
    let response = app.post_subscribe(&body).await;

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Email already subscribed");
}

#[tokio::test]
async fn the_verification_link_verifies_the_subscriber_once() {
    let app = spawn_app().await;
    let token = app
        .create_unverified_subscriber("ursula@example.com", &["general"])
        .await;

    let first = app.get(&format!("/subscribers/verify/{token}")).await;
    let second = app.get(&format!("/subscribers/verify/{token}")).await;

    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 404);
    let (is_verified,): (bool,) = sqlx::query_as("SELECT is_verified FROM subscribers")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert!(is_verified);
}

#[tokio::test]
async fn unknown_tokens_are_rejected_with_a_404() {
    let app = spawn_app().await;

    let verify = app.get("/subscribers/verify/not-a-real-token").await;
    let unsubscribe = app.get("/subscribers/unsubscribe/not-a-real-token").await;

    assert_eq!(verify.status().as_u16(), 404);
    assert_eq!(unsubscribe.status().as_u16(), 404);
}

#[tokio::test]
async fn unsubscribing_is_idempotent_and_allows_reactivation() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    app.post_subscribe(&json!({ "email": "ursula@example.com" }))
        .await
        .error_for_status()
        .unwrap();
    let (unsubscribe_token,): (String,) =
        sqlx::query_as("SELECT unsubscribe_token FROM subscribers")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();

    for _ in 0..2 {
        let response = app
            .get(&format!("/subscribers/unsubscribe/{unsubscribe_token}"))
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }
    let (is_active,): (bool,) = sqlx::query_as("SELECT is_active FROM subscribers")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert!(!is_active);

    let response = app
        .post_subscribe(&json!({ "email": "ursula@example.com", "interests": ["videos"] }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let (count, token_after): (i64, String) = sqlx::query_as(
        "SELECT COUNT(*) OVER (), unsubscribe_token FROM subscribers",
    )
    .fetch_one(&app.db_pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
    assert_eq!(token_after, unsubscribe_token);
}

#[tokio::test]
async fn subscribers_can_be_listed_filtered_and_counted() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    for (email, interests) in [
        ("ann@example.com", json!(["photos"])),
        ("bob@example.com", json!(["press", "general"])),
        ("cid@example.com", json!(["photos", "videos"])),
    ] {
        app.post_subscribe(&json!({ "email": email, "interests": interests }))
            .await
            .error_for_status()
            .unwrap();
    }

    let response = app.get("/subscribers?interests=photos&limit=1").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["count"], 1);
    assert_eq!(body["pagination"]["pages"], 2);

    let response = app.get("/subscribers?search=BOB").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["email"], "bob@example.com");

    let response = app.get("/subscribers/stats").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["active"], 3);
    assert_eq!(body["data"]["verified"], 0);
}

#[tokio::test]
async fn an_administrator_can_update_and_delete_a_subscriber() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    let response = app
        .post_subscribe(&json!({ "email": "ursula@example.com" }))
        .await;
    let body: Value = response.json().await.unwrap();
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .put_json(
            &format!("/subscribers/{id}"),
            &json!({ "firstName": "Ursula", "isActive": false }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["firstName"], "Ursula");
    assert_eq!(body["data"]["isActive"], false);
    assert!(!body["data"]["unsubscribedAt"].is_null());

    let response = app.delete(&format!("/subscribers/{id}")).await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app.delete(&format!("/subscribers/{id}")).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn concurrent_subscriptions_for_the_same_email_create_a_single_record() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    let body = json!({ "email": "ursula@example.com" });

    let (first, second) = tokio::join!(app.post_subscribe(&body), app.post_subscribe(&body));

    let mut statuses = vec![first.status().as_u16(), second.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![201, 400]);
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscribers")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn unsubscribing_keeps_engagement_counters() {
    let app = spawn_app().await;
    app.accept_all_emails().await;
    app.post_subscribe(&json!({ "email": "ursula@example.com" }))
        .await
        .error_for_status()
        .unwrap();
    let (unsubscribe_token,): (String,) =
        sqlx::query_as("UPDATE subscribers SET emails_sent = 3 RETURNING unsubscribe_token")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();

    app.get(&format!("/subscribers/unsubscribe/{unsubscribe_token}"))
        .await
        .error_for_status()
        .unwrap();

    let (emails_sent, is_active): (i32, bool) =
        sqlx::query_as("SELECT emails_sent, is_active FROM subscribers")
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(emails_sent, 3);
    assert!(!is_active);
}
