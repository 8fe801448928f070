pub mod configuration;
pub mod directory;
pub mod dispatch;
pub mod domain;
pub mod email_client;
pub mod routes;
pub mod site_settings;
pub mod startup;
pub mod store;
pub mod telemetry;
