//! Error types for codeforlife-deploy.
//!
//! Everything here is fatal to startup. Scheduler authentication failures
//! never surface as [`Error`]; see [`crate::auth`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("object store error: {0}")]
    Store(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("secrets object is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid database data: {0}")]
    InvalidDatabaseData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
