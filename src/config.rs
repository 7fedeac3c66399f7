use std::time::Duration;

use serde::Deserialize;

use crate::dispatcher::DispatcherSettings;
use crate::models::TopicMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: String,
    pub aws_region: String,
    /// `<business_type>=<topic>` pairs, comma separated.
    pub business_topics: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    pub lock_timeout_ms: Option<u64>,
    pub publish_timeout_ms: Option<u64>,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    pub max_publish_attempts: Option<u32>,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    pub sentry_dsn: Option<String>,
    /// Insert missing lock rows for the configured business types at startup.
    #[serde(default)]
    pub provision_lock_rows: bool,
}

fn default_poll_interval() -> u64 {
    5000 // Default to 5 seconds
}

fn default_batch_size() -> u32 {
    10
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_max_connections() -> u32 {
    5
}

fn default_health_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        Self::validated(envy::from_env::<Config>()?)
    }

    /// Same as [`Config::load`] but reads from the given pairs instead of the
    /// process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::validated(envy::from_iter::<_, Config>(vars)?)
    }

    fn validated(config: Config) -> Result<Self, envy::Error> {
        // Manually check that DATABASE_URL was loaded for the main app
        if config.database_url.trim().is_empty() {
            return Err(envy::Error::MissingValue("DATABASE_URL"));
        }
        if config.batch_size == 0 {
            return Err(envy::Error::Custom("BATCH_SIZE must be at least 1".to_string()));
        }
        if config.max_publish_attempts == Some(0) {
            return Err(envy::Error::Custom(
                "MAX_PUBLISH_ATTEMPTS must be at least 1 (leave it unset to retry forever)".to_string(),
            ));
        }
        config.topics()?;

        Ok(config)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn topics(&self) -> Result<TopicMap, envy::Error> {
        self.business_topics
            .parse()
            .map_err(|e| envy::Error::Custom(format!("BUSINESS_TOPICS: {}", e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lock waits are bounded by the poll interval unless configured.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.poll_interval())
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            poll_interval: self.poll_interval(),
            batch_size: self.batch_size,
            publish_timeout: self
                .publish_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.poll_interval()),
            max_publish_attempts: self.max_publish_attempts,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}
