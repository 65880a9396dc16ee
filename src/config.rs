//! Pipeline configuration, read from the environment (after `.env` loading).

use crate::cleaning::DEFAULT_CHUNK_SIZE;
use crate::error::{PipelineError, Result};
use crate::ingestion::columnar::DEFAULT_EXTENSION;
use crate::migration::DEFAULT_BATCH_SIZE;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

const REDACTED: &str = "********";

#[derive(Debug, Clone, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// `DATABASE_URL`, when set, wins over the individual fields.
    #[serde(skip)]
    pub url_override: Option<String>,
}

impl PostgresConfig {
    pub fn url(&self) -> String {
        match &self.url_override {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.database
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(serialize_with = "redact")]
    pub password: String,
    pub database: String,
    pub collection: String,
    #[serde(skip)]
    pub uri_override: Option<String>,
}

impl MongoConfig {
    pub fn uri(&self) -> String {
        match &self.uri_override {
            Some(uri) => uri.clone(),
            None => format!(
                "mongodb://{}:{}@{}:{}/",
                self.user, self.password, self.host, self.port
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub analytical_db_path: PathBuf,
    pub source_extension: String,
    pub postgres: PostgresConfig,
    pub mongo: MongoConfig,
    pub migration_batch_size: usize,
    pub cleaning_chunk_size: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let in_docker = get("RUNNING_IN_DOCKER")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let (pg_host, mongo_host) = if in_docker {
            ("postgres", "mongodb")
        } else {
            ("localhost", "localhost")
        };

        let postgres = PostgresConfig {
            host: or("POSTGRES_HOST", pg_host),
            port: parse_or(&get, "POSTGRES_PORT", 5432)?,
            database: or("POSTGRES_DB", "taxi_db"),
            user: or("POSTGRES_USER", "taxi_user"),
            password: or("POSTGRES_PASSWORD", "taxi-2025"),
            max_connections: parse_or(&get, "POSTGRES_MAX_CONNECTIONS", 5)?,
            acquire_timeout_secs: parse_or(&get, "POSTGRES_ACQUIRE_TIMEOUT_SECS", 30)?,
            url_override: get("DATABASE_URL"),
        };

        let mongo = MongoConfig {
            host: or("MONGO_HOST", mongo_host),
            port: parse_or(&get, "MONGO_PORT", 27017)?,
            user: or("MONGO_INITDB_ROOT_USERNAME", "admin"),
            password: or("MONGO_INITDB_ROOT_PASSWORD", "admin123"),
            database: or("MONGO_DATABASE", "nyc_taxi"),
            collection: or("MONGO_COLLECTION", "cleaned_trips"),
            uri_override: get("MONGO_URI"),
        };

        let config = Self {
            data_dir: PathBuf::from(or("DATA_DIR", "data/raw")),
            analytical_db_path: PathBuf::from(or("ANALYTICAL_DB_PATH", "data/taxi.sqlite")),
            source_extension: or("SOURCE_EXTENSION", DEFAULT_EXTENSION),
            postgres,
            mongo,
            migration_batch_size: parse_or(&get, "MIGRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            cleaning_chunk_size: parse_or(&get, "CLEANING_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
        };

        if config.migration_batch_size == 0 || config.cleaning_chunk_size == 0 {
            return Err(PipelineError::Config(
                "batch and chunk sizes must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            PipelineError::Config(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
    }
}

fn redact<S: serde::Serializer>(_: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(REDACTED)
}
