//! ID token verification.
//!
//! [`GoogleIdTokenVerifier`] checks tokens minted by Google for a service
//! account: RS256 signature against Google's published JWKS, expiry,
//! audience and issuer.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The claims the scheduler check looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token header has no key id")]
    MissingKeyId,
    #[error("no signing key with id {0}")]
    UnknownKeyId(String),
    #[error("fetching signing keys failed: {0}")]
    Certs(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

/// Verifies a bearer ID token for one audience.
#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str, audience: &str) -> Result<IdTokenClaims, VerifyError>;
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    iss: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Debug, Clone)]
pub struct GoogleIdTokenVerifier {
    certs_url: String,
    http_client: Client,
}

impl GoogleIdTokenVerifier {
    pub fn new() -> Result<Self, VerifyError> {
        Self::with_certs_url(GOOGLE_CERTS_URL)
    }

    pub fn with_certs_url(certs_url: impl Into<String>) -> Result<Self, VerifyError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            certs_url: certs_url.into(),
            http_client,
        })
    }

    async fn fetch_certs(&self) -> Result<JwkSet, VerifyError> {
        tracing::debug!(url = %self.certs_url, "fetching ID token signing keys");
        let certs = self
            .http_client
            .get(&self.certs_url)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;
        Ok(certs)
    }
}

#[async_trait]
impl IdTokenVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, token: &str, audience: &str) -> Result<IdTokenClaims, VerifyError> {
        // Reject garbage before touching the network.
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::Other(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;

        let certs = self.fetch_certs().await?;
        let jwk = certs
            .find(&kid)
            .ok_or_else(|| VerifyError::UnknownKeyId(kid.clone()))?;
        let key = DecodingKey::from_jwk(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&GOOGLE_ISSUERS);

        let data = jsonwebtoken::decode::<GoogleClaims>(token, &key, &validation)?;
        Ok(IdTokenClaims {
            iss: data.claims.iss,
            email: data.claims.email,
            email_verified: data.claims.email_verified,
        })
    }
}
