//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use stayline_subscriptions::{RetryPolicy, SubscriptionOptions};

use crate::error::AppError;

/// Settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Upper bound of the connection pool.
    pub database_max_connections: u32,
    /// Pause before a dropped subscription resubscribes.
    pub resubscribe_delay: Duration,
    /// Handler attempts per batch or event before dead-lettering.
    pub handler_max_attempts: u32,
    /// Pause between handler attempts.
    pub handler_retry_delay: Duration,
    /// Maximum events handed to a handler at once.
    pub max_batch_size: usize,
    /// OTLP collector endpoint. Export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config("DATABASE_URL environment variable must be set".to_owned())
            })?;

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            resubscribe_delay: Duration::from_millis(parse_or(
                &lookup,
                "SUBSCRIPTION_RESUBSCRIBE_DELAY_MS",
                1000,
            )?),
            handler_max_attempts: parse_or(&lookup, "SUBSCRIPTION_HANDLER_MAX_ATTEMPTS", 3)?,
            handler_retry_delay: Duration::from_millis(parse_or(
                &lookup,
                "SUBSCRIPTION_HANDLER_RETRY_DELAY_MS",
                200,
            )?),
            max_batch_size: parse_or(&lookup, "SUBSCRIPTION_MAX_BATCH_SIZE", 100)?,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|endpoint| !endpoint.trim().is_empty()),
        })
    }

    /// The socket address to listen on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Subscription options for `subscription_id` with the configured
    /// delays, retries and batch size.
    #[must_use]
    pub fn subscription_options(&self, subscription_id: &str) -> SubscriptionOptions {
        SubscriptionOptions::new(subscription_id)
            .with_resubscribe_delay(self.resubscribe_delay)
            .with_max_batch_size(self.max_batch_size)
            .with_handler_retry(RetryPolicy {
                max_attempts: self.handler_max_attempts,
                delay: self.handler_retry_delay,
            })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}
