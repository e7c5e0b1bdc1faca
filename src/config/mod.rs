//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Secrets are fetched from the app bucket and kept apart from the
//! process environment; see [`secrets`].

mod env;
mod env_file;
pub mod secrets;

pub use env::{Env, load_env_files};

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::store::ObjectStore;
use secrets::Secrets;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_id: Option<String>,
    pub app_version: Option<String>,
    pub app_bucket: String,
    pub app_folder: String,
    pub rds_db_name: Option<String>,
    pub rds_schema_name: Option<String>,
    pub rds_instance_name: Option<String>,
    pub gae_service: Option<String>,
    pub google_cloud_project: Option<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call [`load_env_files`] first so the env files under the service's
    /// `env/` directory are visible here.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            app_id: optional_var("APP_ID"),
            app_version: optional_var("APP_VERSION"),
            app_bucket: required_var("aws_s3_app_bucket")?,
            app_folder: required_var("aws_s3_app_folder")?,
            rds_db_name: optional_var("RDS_DB_NAME"),
            rds_schema_name: optional_var("RDS_SCHEMA_NAME"),
            rds_instance_name: optional_var("RDS_INSTANCE_NAME"),
            gae_service: optional_var("GAE_SERVICE"),
            google_cloud_project: optional_var("GOOGLE_CLOUD_PROJECT"),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Object key of the secrets file inside the app bucket.
    pub fn secrets_key(&self) -> String {
        format!("{}/secure/.env.secrets", self.app_folder)
    }

    /// Object key of the database metadata inside the app bucket.
    pub fn db_data_key(&self) -> Result<String> {
        let db_name = self
            .rds_db_name
            .as_deref()
            .ok_or_else(|| missing("RDS_DB_NAME"))?;
        let schema = self
            .rds_schema_name
            .as_deref()
            .ok_or_else(|| missing("RDS_SCHEMA_NAME"))?;
        let instance = match self.rds_instance_name.as_deref() {
            Some(name) => format!("{name}/"),
            None => String::new(),
        };
        Ok(format!(
            "{}/dbMetadata/{instance}{db_name}/{schema}.dbdata",
            self.app_folder
        ))
    }
}

/// Everything the service needs after [`set_up_settings`] has run.
#[derive(Debug)]
pub struct ServiceSettings {
    pub service_name: String,
    pub service_base_dir: PathBuf,
    pub env: Env,
    pub config: Config,
    pub secrets: Secrets,
}

/// Resolve the environment, load env files, and fetch the secrets.
///
/// Secrets are returned rather than exported as environment variables so
/// that third-party code cannot read them. Any failure here is fatal.
pub async fn set_up_settings(
    service_base_dir: &Path,
    service_name: &str,
    store: &dyn ObjectStore,
) -> Result<ServiceSettings> {
    let env = Env::from_env()?;
    load_env_files(service_base_dir, env)?;

    let config = Config::from_env()?;
    tracing::info!(
        service = service_name,
        env = %env,
        bucket = %config.app_bucket,
        "setting up service"
    );

    let secrets = Secrets::load(store, &config.app_bucket, &config.secrets_key()).await?;

    Ok(ServiceSettings {
        service_name: service_name.to_string(),
        service_base_dir: service_base_dir.to_path_buf(),
        env,
        config,
        secrets,
    })
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name).ok_or_else(|| missing(name))
}

fn missing(name: &str) -> Error {
    Error::Config(format!("required environment variable {name} is not set"))
}
