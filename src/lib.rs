//! Mailroom - an email-sending backend.
//!
//! Authenticated users register mailboxes against a provider (SMTP-family,
//! Amazon SES, Mailgun, SendGrid) and submit emails through a uniform
//! dispatch pipeline: every submission is logged, delivered in a background
//! task with bounded retry, and HTML bodies carry a tracking pixel that
//! records opens back onto the delivery log.

pub mod app;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod mailer;
pub mod routes;
pub mod tracking;

pub use app::{AppContext, AppContextBuilder};
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from the environment (`RUST_LOG`), defaulting to
/// `info`.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize tracing from the loaded configuration.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
