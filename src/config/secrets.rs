//! The secrets bundle.
//!
//! Secrets come from a single `.env.secrets` object in the app bucket and
//! are parsed with env-file syntax, keeping every `$` that is not part of a
//! `${NAME}` reference. They are kept out of the process environment so
//! third-party code cannot read them, and every value is wrapped in
//! [`SecretString`] so it never lands in a log.

use std::collections::HashMap;
use std::fmt;

pub use secrecy::{ExposeSecret, SecretString};

use super::env_file;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::telemetry::{metrics, spans};
use opentelemetry::KeyValue;
use tracing::Instrument;

/// Immutable lookup of the service's secrets.
///
/// Unknown keys resolve to `None` rather than failing. A key declared
/// without `=` is present but has no value.
#[derive(Default)]
pub struct Secrets {
    values: HashMap<String, Option<SecretString>>,
}

impl Secrets {
    /// Parse an env-file body.
    ///
    /// Values are kept exactly as written apart from quoting, escapes and
    /// `${NAME}` references, which resolve against earlier keys and then
    /// the process environment. A key declared twice keeps its last value.
    /// Statements that do not parse are skipped with a warning.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let body = String::from_utf8(bytes)?;
        let values = env_file::parse(&body, |name| std::env::var(name).ok())
            .into_iter()
            .map(|binding| (binding.key, binding.value.map(SecretString::from)))
            .collect();
        Ok(Self { values })
    }

    /// Fetch `bucket/key` from the store and parse it.
    pub async fn load(store: &dyn ObjectStore, bucket: &str, key: &str) -> Result<Self> {
        let span = spans::start_secrets_span(bucket, key);
        async move {
            let result = match store.get_object(bucket, key).await {
                Ok(bytes) => Self::parse(bytes),
                Err(e) => Err(e),
            };

            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics::secrets_loads().add(1, &[KeyValue::new("result", outcome)]);

            match &result {
                Ok(secrets) => tracing::info!(count = secrets.len(), "loaded secrets"),
                Err(e) => tracing::error!(error = %e, "failed to load secrets"),
            }
            result
        }
        .instrument(span)
        .await
    }

    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.values.get(key).and_then(Option::as_ref)
    }

    /// The plain value for `key`, for handing to whatever needs it.
    pub fn expose(&self, key: &str) -> Option<&str> {
        self.get(key).map(|v| v.expose_secret())
    }

    /// Whether `key` is declared, with or without a value.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Declared keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("keys", &self.keys())
            .finish()
    }
}
