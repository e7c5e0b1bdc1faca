//! Metric instruments.
//!
//! Created from the globally-registered `MeterProvider`; without an OTLP
//! endpoint they are no-ops.

use opentelemetry::metrics::{Counter, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("codeforlife-deploy")
}

/// Counter: secrets bundle loads.
/// Labels: `result` ("ok" | "error").
pub fn secrets_loads() -> Counter<u64> {
    meter()
        .u64_counter("cfl.secrets.loads")
        .with_description("Number of secrets bundle loads")
        .build()
}

/// Counter: object store reads.
/// Labels: `backend` ("s3" | "file"), `result`.
pub fn object_fetches() -> Counter<u64> {
    meter()
        .u64_counter("cfl.store.fetches")
        .with_description("Number of object store reads")
        .build()
}

/// Counter: scheduler authentication decisions.
/// Labels: `result` ("allowed" | "denied"), `reason`.
pub fn scheduler_auth_decisions() -> Counter<u64> {
    meter()
        .u64_counter("cfl.scheduler_auth.decisions")
        .with_description("Cloud scheduler authentication decisions")
        .build()
}
