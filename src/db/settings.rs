//! Postgres connection settings.
//!
//! Local runs read `DB_*` variables with development defaults. Deployed
//! environments read a JSON metadata object that sits next to the secrets
//! in the app bucket.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::config::{Config, Env};
use crate::error::{Error, Result};
use crate::store::ObjectStore;

pub struct DatabaseSettings {
    pub name: String,
    pub user: String,
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    /// Wrap each request in a transaction.
    pub atomic_requests: bool,
}

/// Shape of the `.dbdata` metadata object.
#[derive(Deserialize)]
struct DbData {
    #[serde(rename = "DBEngine")]
    engine: String,
    #[serde(rename = "Database")]
    database: String,
    user: String,
    password: String,
    #[serde(rename = "Endpoint")]
    endpoint: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl DatabaseSettings {
    /// Settings for `env`: env vars locally, bucket metadata otherwise.
    pub async fn resolve(env: Env, config: &Config, store: &dyn ObjectStore) -> Result<Self> {
        if env.is_local() {
            return Self::from_env();
        }

        let key = config.db_data_key()?;
        tracing::debug!(bucket = %config.app_bucket, %key, "fetching database metadata");
        let bytes = store.get_object(&config.app_bucket, &key).await?;
        Self::from_db_data(&bytes)
    }

    pub fn from_env() -> Result<Self> {
        let port = var_or("DB_PORT", "5432");
        let port = port
            .parse()
            .map_err(|_| Error::Config(format!("DB_PORT is not a valid port: {port}")))?;
        Ok(Self {
            name: var_or("DB_NAME", "codeforlife"),
            user: var_or("DB_USER", "root"),
            password: SecretString::from(var_or("DB_PASSWORD", "password")),
            host: var_or("DB_HOST", "localhost"),
            port,
            atomic_requests: true,
        })
    }

    /// Parse the JSON metadata object. Only Postgres is accepted.
    pub fn from_db_data(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let is_empty = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(Error::InvalidDatabaseData("metadata is empty".to_string()));
        }

        let data: DbData = serde_json::from_value(value)
            .map_err(|e| Error::InvalidDatabaseData(e.to_string()))?;
        if data.engine != "postgres" {
            return Err(Error::InvalidDatabaseData(format!(
                "unsupported engine '{}'",
                data.engine
            )));
        }

        Ok(Self {
            name: data.database,
            user: data.user,
            password: SecretString::from(data.password),
            host: data.endpoint,
            port: data.port,
            atomic_requests: true,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(self.password.expose_secret())
            .database(&self.name)
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("atomic_requests", &self.atomic_requests)
            .finish_non_exhaustive()
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
