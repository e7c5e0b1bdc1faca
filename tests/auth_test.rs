//! Integration tests for cloud scheduler authentication and permissions.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codeforlife_deploy::auth::{
    AllowAny, CLOUD_SCHEDULER_SERVICE_ACCOUNT, GOOGLE_ISSUER, IdTokenClaims, IdTokenVerifier,
    IsCloudScheduler, Permission, SchedulerAudiences, SchedulerAuthenticator, VerifyError,
    same_permission,
};
use http::header::AUTHORIZATION;
use http::request::Parts;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Verifier that returns canned claims for "goodtoken" and records calls.
struct MockVerifier {
    claims: IdTokenClaims,
    calls: AtomicUsize,
    audiences: Mutex<Vec<String>>,
}

impl MockVerifier {
    fn new(claims: IdTokenClaims) -> Arc<Self> {
        Arc::new(Self {
            claims,
            calls: AtomicUsize::new(0),
            audiences: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_audience(&self) -> Option<String> {
        self.audiences.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl IdTokenVerifier for MockVerifier {
    async fn verify(&self, token: &str, audience: &str) -> Result<IdTokenClaims, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.audiences.lock().unwrap().push(audience.to_string());
        if token == "goodtoken" {
            Ok(self.claims.clone())
        } else {
            Err(VerifyError::Other("token expired".to_string()))
        }
    }
}

fn scheduler_claims() -> IdTokenClaims {
    IdTokenClaims {
        iss: GOOGLE_ISSUER.to_string(),
        email: Some(CLOUD_SCHEDULER_SERVICE_ACCOUNT.to_string()),
        email_verified: true,
    }
}

fn audiences() -> SchedulerAudiences {
    SchedulerAudiences::new("default", "decent-digit-629")
}

fn authenticator(verifier: Arc<MockVerifier>) -> SchedulerAuthenticator {
    SchedulerAuthenticator::new(verifier, audiences())
}

fn request(path: &str, authorization: Option<&str>) -> Parts {
    let mut builder = http::Request::builder().uri(path);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(()).unwrap().into_parts().0
}

/// Counts WARN events seen while installed.
#[derive(Clone, Default)]
struct WarnCount(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCount {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run a check with a thread-local subscriber and report how many warnings
/// it logged.
async fn warnings_during(check: impl Future<Output = bool>) -> (bool, usize) {
    let warnings = WarnCount::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));
    let allowed = check.await;
    (allowed, warnings.0.load(Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// Header handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_header_is_rejected_without_verification() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    assert!(!auth.is_cloud_scheduler(&request("/users/inactive/", None)).await);
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn malformed_headers_are_rejected_without_verification() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    for header in ["goodtoken", "Basic goodtoken", "Bearer", "Bearer goodtoken extra"] {
        let req = request("/users/inactive/", Some(header));
        assert!(!auth.is_cloud_scheduler(&req).await, "{header}");
    }
    assert_eq!(verifier.calls(), 0);
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verified_scheduler_token_is_accepted() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    let req = request("/users/inactive/", Some("Bearer goodtoken"));
    assert!(auth.is_cloud_scheduler(&req).await);
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn scheme_is_case_insensitive() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier);

    let req = request("/users/inactive/", Some("bearer goodtoken"));
    assert!(auth.is_cloud_scheduler(&req).await);
}

#[tokio::test]
async fn unverified_email_is_rejected() {
    let verifier = MockVerifier::new(IdTokenClaims {
        email_verified: false,
        ..scheduler_claims()
    });
    let auth = authenticator(verifier);

    let req = request("/users/inactive/", Some("Bearer goodtoken"));
    assert!(!auth.is_cloud_scheduler(&req).await);
}

#[tokio::test]
async fn wrong_issuer_is_rejected() {
    let verifier = MockVerifier::new(IdTokenClaims {
        iss: "accounts.google.com".to_string(),
        ..scheduler_claims()
    });
    let auth = authenticator(verifier);

    let req = request("/users/inactive/", Some("Bearer goodtoken"));
    assert!(!auth.is_cloud_scheduler(&req).await);
}

#[tokio::test]
async fn other_service_account_is_rejected() {
    for email in [Some("someone@decent-digit-629.iam.gserviceaccount.com"), None] {
        let verifier = MockVerifier::new(IdTokenClaims {
            email: email.map(str::to_string),
            ..scheduler_claims()
        });
        let auth = authenticator(verifier);

        let req = request("/users/inactive/", Some("Bearer goodtoken"));
        assert!(!auth.is_cloud_scheduler(&req).await, "{email:?}");
    }
}

#[tokio::test]
async fn verification_error_becomes_false() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    let req = request("/users/inactive/", Some("Bearer expiredtoken"));
    assert!(!auth.is_cloud_scheduler(&req).await);
    assert_eq!(verifier.calls(), 1);
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verification_error_logs_a_warning() {
    let auth = authenticator(MockVerifier::new(scheduler_claims()));

    let req = request("/users/inactive/", Some("Bearer expiredtoken"));
    let (allowed, warnings) = warnings_during(auth.is_cloud_scheduler(&req)).await;
    assert!(!allowed);
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn malformed_header_logs_a_warning() {
    let auth = authenticator(MockVerifier::new(scheduler_claims()));

    let req = request("/users/inactive/", Some("Basic goodtoken"));
    let (allowed, warnings) = warnings_during(auth.is_cloud_scheduler(&req)).await;
    assert!(!allowed);
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn claim_mismatch_logs_a_warning() {
    let auth = authenticator(MockVerifier::new(IdTokenClaims {
        email_verified: false,
        ..scheduler_claims()
    }));

    let req = request("/users/inactive/", Some("Bearer goodtoken"));
    let (allowed, warnings) = warnings_during(auth.is_cloud_scheduler(&req)).await;
    assert!(!allowed);
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn missing_header_and_success_log_no_warning() {
    let auth = authenticator(MockVerifier::new(scheduler_claims()));

    let (allowed, warnings) =
        warnings_during(auth.is_cloud_scheduler(&request("/users/inactive/", None))).await;
    assert!(!allowed);
    assert_eq!(warnings, 0);

    let req = request("/users/inactive/", Some("Bearer goodtoken"));
    let (allowed, warnings) = warnings_during(auth.is_cloud_scheduler(&req)).await;
    assert!(allowed);
    assert_eq!(warnings, 0);
}

// ---------------------------------------------------------------------------
// Audience selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn indy_cleanup_path_uses_indy_cleanup_audience() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    let req = request("/indycleanup/", Some("Bearer goodtoken"));
    assert!(auth.is_cloud_scheduler(&req).await);
    assert_eq!(
        verifier.last_audience().as_deref(),
        Some("https://default-dot-decent-digit-629.appspot.com/indycleanup/")
    );
}

#[tokio::test]
async fn other_paths_use_inactive_users_audience() {
    let verifier = MockVerifier::new(scheduler_claims());
    let auth = authenticator(verifier.clone());

    let req = request("/users/inactive/?dry_run=1", Some("Bearer goodtoken"));
    assert!(auth.is_cloud_scheduler(&req).await);
    assert_eq!(
        verifier.last_audience().as_deref(),
        Some("https://default-dot-decent-digit-629.appspot.com/users/inactive/")
    );
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn allow_any_allows_bare_requests() {
    assert!(AllowAny.has_permission(&request("/", None)).await);
}

#[tokio::test]
async fn is_cloud_scheduler_permission_delegates() {
    let verifier = MockVerifier::new(scheduler_claims());
    let permission = IsCloudScheduler::new(authenticator(verifier));

    assert!(
        permission
            .has_permission(&request("/indycleanup/", Some("Bearer goodtoken")))
            .await
    );
    assert!(!permission.has_permission(&request("/indycleanup/", None)).await);
}

#[test]
fn permissions_compare_by_type() {
    let scheduler_a = IsCloudScheduler::new(authenticator(MockVerifier::new(scheduler_claims())));
    let scheduler_b = IsCloudScheduler::new(SchedulerAuthenticator::new(
        MockVerifier::new(scheduler_claims()),
        SchedulerAudiences::new("other", "project"),
    ));

    assert!(same_permission(&AllowAny, &AllowAny));
    assert!(same_permission(&scheduler_a, &scheduler_b));
    assert!(!same_permission(&AllowAny, &scheduler_a));
}
