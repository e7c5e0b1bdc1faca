//! Authentication of requests sent by the cloud scheduler.
//!
//! Scheduled jobs reach the service as ordinary HTTP requests carrying a
//! Google-signed ID token. A request counts as coming from the scheduler
//! only when the token verifies for the endpoint's audience and names the
//! scheduler's service account with a verified email. Every failure is a
//! logged `false`; nothing here returns an error to the caller.

mod bearer;
pub mod permissions;
mod verifier;

pub use bearer::{BearerError, bearer_token};
pub use permissions::{AllowAny, IsCloudScheduler, Permission, same_permission};
pub use verifier::{GoogleIdTokenVerifier, IdTokenClaims, IdTokenVerifier, VerifyError};

use std::sync::Arc;

use http::request::Parts;
use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::telemetry::{metrics, spans};

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";
pub const CLOUD_SCHEDULER_SERVICE_ACCOUNT: &str =
    "cloud-scheduler@decent-digit-629.iam.gserviceaccount.com";

const INDY_CLEANUP_SUFFIX: &str = "/indycleanup/";

/// The two endpoints the scheduler calls, each its own token audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerAudiences {
    pub inactive_users: String,
    pub indy_cleanup: String,
}

impl SchedulerAudiences {
    /// Audiences for the App Engine service `service` in `project`.
    pub fn new(service: &str, project: &str) -> Self {
        let origin = format!("https://{service}-dot-{project}.appspot.com");
        Self {
            inactive_users: format!("{origin}/users/inactive/"),
            indy_cleanup: format!("{origin}{INDY_CLEANUP_SUFFIX}"),
        }
    }

    /// Requires `GAE_SERVICE` and `GOOGLE_CLOUD_PROJECT`.
    pub fn from_config(config: &Config) -> Result<Self> {
        match (&config.gae_service, &config.google_cloud_project) {
            (Some(service), Some(project)) => Ok(Self::new(service, project)),
            _ => Err(Error::Config(
                "GAE_SERVICE and GOOGLE_CLOUD_PROJECT must be set to authenticate scheduler requests"
                    .to_string(),
            )),
        }
    }

    /// The audience a token for `path` must have been minted for.
    pub fn for_path(&self, path: &str) -> &str {
        if path.ends_with(INDY_CLEANUP_SUFFIX) {
            &self.indy_cleanup
        } else {
            &self.inactive_users
        }
    }
}

/// Decides whether a request was sent by the cloud scheduler.
#[derive(Clone)]
pub struct SchedulerAuthenticator {
    verifier: Arc<dyn IdTokenVerifier>,
    audiences: SchedulerAudiences,
}

impl SchedulerAuthenticator {
    pub fn new(verifier: Arc<dyn IdTokenVerifier>, audiences: SchedulerAudiences) -> Self {
        Self {
            verifier,
            audiences,
        }
    }

    pub fn audiences(&self) -> &SchedulerAudiences {
        &self.audiences
    }

    /// True only for a verified scheduler token. Never errors.
    pub async fn is_cloud_scheduler(&self, request: &Parts) -> bool {
        let audience = self.audiences.for_path(request.uri.path());
        let span = spans::start_scheduler_auth_span(request.uri.path(), audience);

        async {
            let (allowed, reason) = self.decide(request, audience).await;
            spans::record_decision(allowed, reason);
            metrics::scheduler_auth_decisions().add(
                1,
                &[
                    KeyValue::new("result", if allowed { "allowed" } else { "denied" }),
                    KeyValue::new("reason", reason),
                ],
            );
            allowed
        }
        .instrument(span)
        .await
    }

    async fn decide(&self, request: &Parts, audience: &str) -> (bool, &'static str) {
        let token = match bearer_token(&request.headers) {
            Ok(token) => token,
            // The scheduler always sends a token, so a bare request is not worth a warning.
            Err(BearerError::Missing) => return (false, "missing_header"),
            Err(e) => {
                tracing::warn!(error = %e, "rejecting scheduler request");
                return (false, "malformed_header");
            }
        };

        let claims = match self.verifier.verify(token, audience).await {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    audience,
                    "couldn't verify and authorize cloud scheduler request"
                );
                return (false, "verification_failed");
            }
        };

        if claims.iss != GOOGLE_ISSUER {
            tracing::warn!(issuer = %claims.iss, "scheduler token has unexpected issuer");
            return (false, "wrong_issuer");
        }
        if claims.email.as_deref() != Some(CLOUD_SCHEDULER_SERVICE_ACCOUNT) {
            tracing::warn!(
                email = claims.email.as_deref().unwrap_or("<none>"),
                "scheduler token is not for the scheduler service account"
            );
            return (false, "wrong_account");
        }
        if !claims.email_verified {
            tracing::warn!("scheduler token email is not verified");
            return (false, "email_unverified");
        }

        (true, "ok")
    }
}
