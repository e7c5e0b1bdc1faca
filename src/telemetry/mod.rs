//! Logging, tracing and metrics setup.
//!
//! Logs always go to stderr through `tracing-subscriber`. When an OTLP
//! endpoint is configured, spans, metrics and log records are exported
//! there as well.

pub mod metrics;
pub mod spans;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource as resource_attr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::Config;
use crate::error::{Error, Result};

pub struct TelemetryConfig {
    /// OTLP/gRPC endpoint, e.g. "http://localhost:4317". `None` means
    /// stderr only.
    pub endpoint: Option<String>,
    pub service_name: String,
    pub service_version: Option<String>,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn from_config(config: &Config, service_name: &str) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            service_name: service_name.to_string(),
            service_version: config.app_version.clone(),
            log_level: config.log_level.clone(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            service_name: "codeforlife".to_string(),
            service_version: None,
            log_level: "info".to_string(),
        }
    }
}

/// Holds the OTel providers; flushes and shuts them down on drop.
#[derive(Default)]
pub struct TelemetryGuard {
    providers: Option<OtlpProviders>,
}

struct OtlpProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl TelemetryGuard {
    /// Push out anything buffered. Call before a short-lived command exits.
    pub fn force_flush(&self) {
        if let Some(providers) = &self.providers {
            let _ = providers.tracer.force_flush();
            let _ = providers.meter.force_flush();
            let _ = providers.logger.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(providers) = self.providers.take() {
            let _ = providers.logger.shutdown();
            let _ = providers.meter.shutdown();
            let _ = providers.tracer.shutdown();
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if an OTLP exporter cannot be built or a global subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    let Some(endpoint) = config.endpoint else {
        registry.try_init().map_err(subscriber_error)?;
        return Ok(TelemetryGuard::default());
    };

    let providers = build_otlp_providers(&endpoint, config.service_name, config.service_version)?;
    opentelemetry::global::set_meter_provider(providers.meter.clone());

    let tracer = providers.tracer.tracer("codeforlife-deploy");
    registry
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(
            opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
                &providers.logger,
            ),
        )
        .try_init()
        .map_err(subscriber_error)?;

    tracing::debug!(%endpoint, "exporting telemetry over OTLP");
    Ok(TelemetryGuard {
        providers: Some(providers),
    })
}

fn build_otlp_providers(
    endpoint: &str,
    service_name: String,
    service_version: Option<String>,
) -> Result<OtlpProviders> {
    let mut resource = Resource::builder().with_service_name(service_name);
    if let Some(version) = service_version {
        resource = resource.with_attribute(KeyValue::new(resource_attr::SERVICE_VERSION, version));
    }
    let resource = resource.build();

    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP span exporter: {e}")))?;
    let metrics = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP metric exporter: {e}")))?;
    let logs = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::Other(format!("failed to create OTLP log exporter: {e}")))?;

    Ok(OtlpProviders {
        tracer: SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build(),
        meter: SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .with_resource(resource.clone())
            .build(),
        logger: SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build(),
    })
}

fn subscriber_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::Other(format!("failed to init tracing subscriber: {e}"))
}
