use anyhow::Result;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use opentelemetry::{global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace as sdk_trace};
use tracing_opentelemetry::OpenTelemetryLayer;

type OtelLayer = OpenTelemetryLayer<tracing_subscriber::Registry, sdk_trace::SdkTracer>;

/// Initialize logging for the CLI
pub fn init_logging(log_level: Level, data_dir: &Path, no_file_log: bool) -> Result<()> {
    // Initialize OpenTelemetry if OTLP_ENDPOINT is set
    let otel_layer = init_opentelemetry()?;
    let env_filter = env_filter(log_level);

    if let Some(otel) = otel_layer {
        tracing_subscriber::registry()
            .with(otel)
            .with(env_filter)
            .with(stderr_layer())
            .init();
    } else if no_file_log {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer())
            .init();
    } else {
        let log_file_path = data_dir.join("cli.log");
        std::fs::create_dir_all(data_dir)?;
        let log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_file_path)?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(log_file)
                    .with_ansi(false),
            )
            .with(stderr_layer())
            .init();
    }

    Ok(())
}

fn env_filter(level: Level) -> EnvFilter {
    let level_str = level.as_str().to_lowercase();
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("servicegpt={level_str},servicegpt_http={level_str}").into())
}

// stdout carries command output
fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer().with_writer(std::io::stderr)
}

/// Initialize OpenTelemetry if OTLP_ENDPOINT environment variable is set
fn init_opentelemetry() -> Result<Option<OtelLayer>> {
    if let Ok(endpoint) = std::env::var("OTLP_ENDPOINT") {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdk_trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(Resource::builder().with_service_name("servicegpt-cli").build())
            .build();

        global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer("servicegpt");

        Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
    } else {
        Ok(None)
    }
}
