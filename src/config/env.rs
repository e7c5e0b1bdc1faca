//! Deployment environment selection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The deployment environment, read from `ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Env {
    #[default]
    Local,
    Development,
    Staging,
    Production,
}

impl Env {
    /// Read `ENV` from the process environment. Unset means `local`.
    pub fn from_env() -> Result<Self> {
        match std::env::var("ENV") {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Self::Local),
            Err(e) => Err(Error::Config(format!("ENV is not valid unicode: {e}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn is_local(self) -> bool {
        self == Self::Local
    }

    /// Debug mode is only ever on for local runs.
    pub fn debug(self) -> bool {
        self.is_local()
    }

    /// The public origin the service is reachable at.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Local => "localhost:8000",
            Self::Development => "https://dev-dot-decent-digit-629.appspot.com",
            Self::Staging => "https://staging-dot-decent-digit-629.appspot.com",
            Self::Production => "https://www.codeforlife.education",
        }
    }

    pub fn allowed_hosts(self) -> &'static [&'static str] {
        if self.is_local() {
            &["*"]
        } else {
            &[".appspot.com", ".codeforlife.education"]
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Env {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(Error::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Load `env/.env.{env}` and then `env/.env` under `base_dir`.
///
/// Variables already present in the process environment win, so the
/// environment-specific file takes precedence over the shared one.
/// Missing files are skipped.
pub fn load_env_files(base_dir: &Path, env: Env) -> Result<()> {
    let env_dir = base_dir.join("env");
    for path in [env_dir.join(format!(".env.{env}")), env_dir.join(".env")] {
        match dotenvy::from_path(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "loaded env file"),
            Err(e) if e.not_found() => {
                tracing::debug!(path = %path.display(), "env file not present, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
