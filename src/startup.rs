use crate::configuration::{DatabaseSettings, Settings};
use crate::directory::SubscriberDirectory;
use crate::dispatch::NewsletterDispatcher;
use crate::email_client::{EmailClient, EmailSender};
use crate::routes;
use crate::site_settings::SiteSettings;
use crate::store::PgStore;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, std::io::Error> {
        let connection_pool = get_connection_pool(&configuration.database);

        let sender_email = configuration
            .email_client
            .sender()
            .expect("Invalid sender email address.");
        let timeout = configuration.email_client.timeout();
        let email_client = EmailClient::new(
            configuration.email_client.base_url.clone(),
            sender_email,
            configuration.email_client.authorization_token.clone(),
            timeout,
        )
        .expect("Unable to build the email client.");

        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address)?;
        // Port 0 in the configuration asks the OS for a random one: read back what we got.
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            connection_pool,
            Arc::new(email_client),
            configuration.application.frontend_url,
            configuration.newsletter.batch_delay(),
        )?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Only returns when the application is stopped.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(configuration.with_db())
}

pub fn run(
    listener: TcpListener,
    db_pool: PgPool,
    email_sender: Arc<dyn EmailSender>,
    frontend_url: String,
    batch_delay: Duration,
) -> Result<Server, std::io::Error> {
    let store = Arc::new(PgStore::new(db_pool.clone()));
    let settings = SiteSettings::new(store.clone());
    let directory = SubscriberDirectory::new(
        store,
        settings.clone(),
        email_sender.clone(),
        frontend_url.clone(),
    );
    let dispatcher = NewsletterDispatcher::new(
        directory.clone(),
        settings.clone(),
        email_sender.clone(),
        frontend_url,
        batch_delay,
    );

    let db_pool = web::Data::new(db_pool);
    let settings = web::Data::new(settings);
    let directory = web::Data::new(directory);
    let dispatcher = web::Data::new(dispatcher);
    let email_sender: web::Data<dyn EmailSender> = web::Data::from(email_sender);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().error_handler(routes::json_error_handler))
            .route("/health_check", web::get().to(routes::health_check))
            .service(
                web::scope("/api")
                    .service(contact_routes())
                    .service(newsletter_routes())
                    .service(subscriber_routes())
                    .service(settings_routes())
                    .service(user_routes()),
            )
            .app_data(db_pool.clone())
            .app_data(settings.clone())
            .app_data(directory.clone())
            .app_data(dispatcher.clone())
            .app_data(email_sender.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

fn contact_routes() -> actix_web::Scope {
    web::scope("/contacts")
        .route("", web::post().to(routes::submit_contact))
        .route("", web::get().to(routes::list_contacts))
        .route("/stats", web::get().to(routes::contact_stats))
        .route("/{id}", web::get().to(routes::get_contact))
        .route("/{id}", web::put().to(routes::update_contact))
        .route("/{id}", web::delete().to(routes::delete_contact))
}

fn newsletter_routes() -> actix_web::Scope {
    web::scope("/newsletters")
        .route("", web::get().to(routes::list_newsletters))
        .route("", web::post().to(routes::create_newsletter))
        .route("/type/{type}", web::get().to(routes::list_newsletters_by_type))
        .route("/{id}", web::get().to(routes::get_newsletter))
        .route("/{id}", web::put().to(routes::update_newsletter))
        .route("/{id}", web::delete().to(routes::delete_newsletter))
        .route("/{id}/send", web::post().to(routes::send_newsletter))
}

fn subscriber_routes() -> actix_web::Scope {
    web::scope("/subscribers")
        .route("/subscribe", web::post().to(routes::subscribe))
        .route("/verify/{token}", web::get().to(routes::verify_subscription))
        .route("/unsubscribe/{token}", web::get().to(routes::unsubscribe))
        .route("", web::get().to(routes::list_subscribers))
        .route("/stats", web::get().to(routes::subscriber_stats))
        .route("/{id}", web::put().to(routes::update_subscriber))
        .route("/{id}", web::delete().to(routes::delete_subscriber))
}

fn settings_routes() -> actix_web::Scope {
    web::scope("/settings")
        .route("/public", web::get().to(routes::get_public_settings))
        .route("", web::get().to(routes::list_settings))
        .route("", web::post().to(routes::upsert_setting))
        .route("/initialize", web::post().to(routes::initialize_settings))
        .route("/bulk", web::put().to(routes::bulk_update_settings))
        .route("/{key}", web::get().to(routes::get_setting))
        .route("/{key}", web::delete().to(routes::delete_setting))
}

fn user_routes() -> actix_web::Scope {
    web::scope("/users")
        .route("", web::get().to(routes::list_users))
        .route("/stats", web::get().to(routes::user_stats))
        .route("/dashboard", web::get().to(routes::dashboard_analytics))
        .route("/{id}", web::get().to(routes::get_user))
        .route("/{id}", web::put().to(routes::update_user))
        .route("/{id}", web::delete().to(routes::delete_user))
}
