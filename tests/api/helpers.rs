use newsletter_site::configuration::{get_configuration, DatabaseSettings};
use newsletter_site::startup::{get_connection_pool, Application};
use newsletter_site::telemetry;
use once_cell::sync::Lazy;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Ensure that the `tracing` stack is only initialised once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    // The sink is part of the type returned by `get_subscriber`, hence the two branches.
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber =
            telemetry::get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        telemetry::init_subscriber(subscriber);
    } else {
        let subscriber =
            telemetry::get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        telemetry::init_subscriber(subscriber);
    }
});

pub(crate) struct TestApp {
    pub(crate) address: String,
    pub(crate) db_pool: PgPool,
    pub(crate) email_server: MockServer,
    api_client: reqwest::Client,
}

/// Links embedded in an email sent to the mock server.
pub(crate) struct EmailLinks {
    pub(crate) html: Vec<String>,
}

impl TestApp {
    fn url(&self, route: &str) -> String {
        format!("{}/api{}", self.address, route)
    }

    pub(crate) async fn get(&self, route: &str) -> reqwest::Response {
        self.api_client
            .get(self.url(route))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub(crate) async fn post_json(&self, route: &str, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(self.url(route))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub(crate) async fn put_json(&self, route: &str, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .put(self.url(route))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub(crate) async fn delete(&self, route: &str) -> reqwest::Response {
        self.api_client
            .delete(self.url(route))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub(crate) async fn post_subscribe(&self, body: &serde_json::Value) -> reqwest::Response {
        self.post_json("/subscribers/subscribe", body).await
    }

    /// Accept every email the application tries to send.
    pub(crate) async fn accept_all_emails(&self) {
        Mock::given(path("/email"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.email_server)
            .await;
    }

    /// Extract the links pointing to the frontend from an email captured by the mock server.
    pub(crate) fn email_links(&self, email_request: &wiremock::Request) -> EmailLinks {
        let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();
        let raw = body["HtmlBody"].as_str().unwrap();
        let html = linkify::LinkFinder::new()
            .links(raw)
            .filter(|l| *l.kind() == linkify::LinkKind::Url)
            .map(|l| l.as_str().to_owned())
            .collect();
        EmailLinks { html }
    }

    /// Subscribe `email` and return the verification token sent to it.
    pub(crate) async fn create_unverified_subscriber(&self, email: &str, interests: &[&str]) -> String {
        let _mock_guard = Mock::given(path("/email"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .named("Create unverified subscriber")
            .expect(1)
            .mount_as_scoped(&self.email_server)
            .await;

        self.post_subscribe(&serde_json::json!({ "email": email, "interests": interests }))
            .await
            .error_for_status()
            .unwrap();

        let email_request = self
            .email_server
            .received_requests()
            .await
            .unwrap()
            .pop()
            .unwrap();
        let links = self.email_links(&email_request);
        let verify_link = links
            .html
            .iter()
            .find(|l| l.contains("/verify/"))
            .expect("No verification link in the confirmation email.");
        verify_link.rsplit('/').next().unwrap().to_string()
    }

    /// Store a user directly: there is no public endpoint that creates one.
    pub(crate) async fn insert_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, email, role) \
             VALUES ($1, 'Ada', 'Lovelace', $2, 'editor')",
        )
        .bind(id)
        .bind(email)
        .execute(&self.db_pool)
        .await
        .expect("Failed to insert a test user.");
        id
    }

    pub(crate) async fn create_newsletter(&self, author: Uuid, body: serde_json::Value) -> serde_json::Value {
        let mut body = body;
        body["author"] = serde_json::json!(author);
        let response = self.post_json("/newsletters", &body).await;
        assert_eq!(response.status().as_u16(), 201);
        response.json::<serde_json::Value>().await.unwrap()["data"].clone()
    }
}

pub(crate) async fn spawn_app() -> TestApp {
    // The first time `initialize` is invoked the code in `TRACING` is executed. All other invocations
    // will instead skip execution.
    Lazy::force(&TRACING);

    // Launch a mock server to stand in for Postmark's API
    let email_server = MockServer::start().await;

    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        // A fresh database for every test keeps them isolated from each other
        c.database.database_name = Uuid::new_v4().to_string();
        // Use a random OS port
        c.application.port = 0;
        c.email_client.base_url = email_server.uri();
        c.newsletter.batch_delay_milliseconds = 10;
        c
    };

    configure_database(&configuration.database).await;

    let application = Application::build(configuration.clone())
        .await
        .expect("Failed to build application.");
    let port = application.port();
    let _ = tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        db_pool: get_connection_pool(&configuration.database),
        email_server,
        api_client: reqwest::Client::new(),
    }
}

/// Create a brand-new logical database with a unique name and run the migrations on it.
async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"CREATE DATABASE "{}";"#, config.database_name).as_str())
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database");
    connection_pool
}
