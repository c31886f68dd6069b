//! Structured logging and optional OpenTelemetry trace export, configured from a
//! `--log-filter`/`--log-format` pair plus an optional `--tracing-url`/`--sample-ratio`.

use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Install the global `tracing` subscriber. `tracing_url` enables OTLP trace export
/// (gRPC) at the given collector endpoint, sampled at `sample_ratio`; `None` leaves
/// tracing local-only.
pub async fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().flatten_event(true).boxed(),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    match tracing_url {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let provider = SdkTracerProvider::builder()
                .with_sampler(Sampler::TraceIdRatioBased(sample_ratio))
                .with_batch_exporter(exporter)
                .with_resource(Resource::builder().with_service_name("npmd").build())
                .build();
            let tracer = provider.tracer("npmd");
            opentelemetry::global::set_tracer_provider(provider);
            registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
        }
        None => registry.init(),
    }

    Ok(())
}
