mod contacts;
mod helpers;
mod settings;
mod subscribers;
