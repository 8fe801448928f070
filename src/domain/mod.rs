mod contact;
mod interest;
mod newsletter;
mod person_name;
mod setting;
mod subscriber;
mod subscriber_email;
mod subscription_token;
mod user;

pub use contact::ContactStatus;
pub use interest::{interests_as_strings, parse_interests, Interest, NewsletterType};
pub use newsletter::{
    generate_slug, plain_text, preview, reading_time, slugify, NewsletterStatus,
};
pub use person_name::PersonName;
pub use setting::{
    parse_setting_key, Setting, SettingCategory, SettingKind, SettingUpsert, SettingValue,
};
pub use subscriber::{NewSubscriber, Subscriber, SubscriberSource};
pub use subscriber_email::SubscriberEmail;
pub use subscription_token::SubscriptionToken;
pub use user::UserRole;
