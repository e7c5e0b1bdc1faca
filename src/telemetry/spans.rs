//! Span helpers for startup and request-time checks.

use tracing::Span;

/// Span around fetching and parsing the secrets object.
pub fn start_secrets_span(bucket: &str, key: &str) -> Span {
    tracing::info_span!("secrets.load", "store.bucket" = bucket, "store.key" = key)
}

/// Span around one scheduler authentication check.
///
/// `auth.allowed` and `auth.reason` are filled in by [`record_decision`].
pub fn start_scheduler_auth_span(path: &str, audience: &str) -> Span {
    tracing::info_span!(
        "scheduler.authenticate",
        "http.path" = path,
        "auth.audience" = audience,
        "auth.allowed" = tracing::field::Empty,
        "auth.reason" = tracing::field::Empty,
    )
}

/// Record the outcome on the current span.
pub fn record_decision(allowed: bool, reason: &str) {
    let span = Span::current();
    span.record("auth.allowed", allowed);
    span.record("auth.reason", reason);
}
