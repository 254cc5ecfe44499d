//! OpenTelemetry bootstrap, adapted from `everruns-core::telemetry`: a
//! `RUST_LOG`-driven console layer plus an optional OTLP exporter gated on
//! `OTEL_EXPORTER_OTLP_ENDPOINT`. GoWe has no gen-ai semantic conventions
//! to carry over — only the init/guard shape is reused.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            service_name: "gowe-api".to_string(),
            service_version: None,
            otlp_endpoint: None,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// `OTEL_SERVICE_NAME`, `OTEL_SERVICE_VERSION`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT`, `RUST_LOG`.
    pub fn from_env() -> Self {
        TelemetryConfig {
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "gowe-api".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_filter: std::env::var("RUST_LOG").ok(),
        }
    }
}

/// Keeps the tracer provider alive for the process lifetime; dropping it
/// flushes and shuts down the OTLP exporter, if one was configured.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("failed to shut down tracer provider: {e:?}");
            }
        }
    }
}

pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = config
        .log_filter
        .as_deref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer().with_target(true).with_filter(filter);

    let (provider, otel_layer, otel_status) = if let Some(endpoint) = &config.otlp_endpoint {
        let mut attrs = vec![KeyValue::new("service.name", config.service_name.clone())];
        if let Some(v) = &config.service_version {
            attrs.push(KeyValue::new("service.version", v.clone()));
        }
        let resource = Resource::builder().with_attributes(attrs).build();

        match build_otlp_tracer(endpoint, resource) {
            Ok((provider, tracer)) => {
                let layer = tracing_opentelemetry::layer().with_tracer(tracer);
                (Some(provider), Some(layer), Some(Ok(endpoint.clone())))
            }
            Err(e) => (None, None, Some(Err(e.to_string()))),
        }
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry().with(console_layer).with(otel_layer).init();

    match otel_status {
        Some(Ok(endpoint)) => tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled"),
        Some(Err(e)) => tracing::warn!(error = %e, "failed to initialize OTLP tracer, continuing without it"),
        None => tracing::debug!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT unset)"),
    }

    TelemetryGuard { provider }
}

fn build_otlp_tracer(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer), opentelemetry::trace::TraceError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("gowe-api");
    Ok((provider, tracer))
}
