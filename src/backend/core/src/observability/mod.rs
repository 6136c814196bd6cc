//! Observability: structured logging, optional OTLP tracing, Prometheus metrics.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry_otlp::WithExportConfig;
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize logging and tracing.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.json_logging {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let Some(endpoint) = config.otlp_endpoint.as_deref() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(
                opentelemetry_sdk::trace::config()
                    .with_resource(opentelemetry_sdk::Resource::new(vec![
                        opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                    ])),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(telemetry_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Install the global Prometheus recorder once and return its handle.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle.clone());
    self::metrics::register_metrics();
    Ok(handle)
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metric descriptions.
pub mod metrics {
    use metrics::{describe_counter, describe_histogram};

    pub fn register_metrics() {
        describe_counter!(
            "warden_checks_total",
            "Permission checks resolved, by outcome and grant source"
        );
        describe_counter!("warden_batch_checks_total", "Batch permission checks resolved");
        describe_counter!(
            "warden_batch_slugs_total",
            "Distinct slugs resolved through batch checks"
        );
        describe_counter!("warden_cache_hits_total", "Resolver cache hits");
        describe_counter!("warden_cache_misses_total", "Resolver cache misses");
        describe_counter!(
            "warden_cache_invalidations_total",
            "Resolver cache invalidations, by kind"
        );
        describe_counter!(
            "warden_catalog_reloads_total",
            "Catalog publish attempts, by outcome"
        );
        describe_counter!("warden_errors_total", "Errors constructed, by code");

        describe_histogram!(
            "warden_lookup_duration_seconds",
            "Duration of the storage lookups behind one check"
        );
    }
}
