use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::notifier::DEFAULT_CAPACITY;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub database_max_connections: u32,
    pub notifier_capacity: usize,
    /// Zero disables the scheduled close sweeper.
    pub poll_sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3030".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            notifier_capacity: match env::var("NOTIFIER_CAPACITY") {
                Ok(v) => v.parse().context("NOTIFIER_CAPACITY must be a valid number")?,
                Err(_) => DEFAULT_CAPACITY,
            },
            poll_sweep_interval: Duration::from_secs(
                env::var("POLL_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("POLL_SWEEP_INTERVAL_SECS must be a number of seconds")?,
            ),
        })
    }
}
