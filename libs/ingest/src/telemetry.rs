//! Tracing initialisation: filtered fmt output plus optional OTLP export.

use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Install the global subscriber. `tracing_url` enables span export with the
/// given head-sampling ratio; without it only local logs are emitted.
pub fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(log_filter)?;
    let fmt_layer = match log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let otel_layer = match tracing_url {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_sampler(Sampler::TraceIdRatioBased(sample_ratio))
                .with_resource(
                    Resource::builder()
                        .with_attribute(KeyValue::new("service.name", "spectre"))
                        .build(),
                )
                .build();
            let tracer = provider.tracer("spectre");
            opentelemetry::global::set_tracer_provider(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_filter_directive_is_an_error() {
        assert!(init("not a filter!!!", LogFormat::Text, None, 1.0).is_err());
    }
}
