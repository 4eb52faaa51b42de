use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::book_store::PostgresBookStoreConfig;

/// Server settings read from the process environment, e.g. `DB_HOST` or `RATE_LIMIT_REQUESTS`
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub use_in_memory_db: bool,
    /// Directory with `<collection>.csv` files the in-memory store is seeded from
    pub data_dir: Option<PathBuf>,
    pub db_host: String,
    pub db_username: String,
    pub db_password: String,
    pub db_name: String,
    pub api_key: String,
    pub port: u16,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    fn from_source(environment: Environment) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .set_default("use_in_memory_db", false)?
            .set_default("db_host", "127.0.0.1")?
            .set_default("db_username", "postgres")?
            .set_default("db_password", "postgres")?
            .set_default("db_name", "postgres")?
            .set_default("api_key", "dev-key-123")?
            .set_default("port", 8080)?
            .set_default("rate_limit_requests", 60)?
            .set_default("rate_limit_window_secs", 60)?
            .add_source(environment)
            .build()?
            .try_deserialize::<Settings>()?;
        if settings.rate_limit_requests == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS must be positive");
        }
        Ok(settings)
    }

    pub fn postgres(&self) -> PostgresBookStoreConfig {
        PostgresBookStoreConfig {
            hostname: self.db_host.clone(),
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            database: self.db_name.clone(),
        }
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}
