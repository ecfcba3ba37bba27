use clap::Parser;
use opentelemetry::global::{set_error_handler, set_text_map_propagator};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, IdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing::{error, info, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use url::Url;

#[derive(Clone, Debug, Parser)]
pub struct Options {
    /// OpenTelemetry http trace submission endpoint
    #[clap(long, env)]
    pub otlp_trace: Option<Url>,
}

impl Options {
    #[allow(clippy::unnecessary_wraps)]
    pub fn to_layer<S>(&self) -> anyhow::Result<Option<impl Layer<S>>>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        let Some(endpoint) = &self.otlp_trace else {
            return Ok(None);
        };

        set_error_handler(|error| {
            error!(?error, "{msg}", msg = error);
        })?;
        set_text_map_propagator(TraceContextPropagator::new());

        let trace_config = trace::config()
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(IdGenerator::default())
            .with_max_events_per_span(64)
            .with_max_attributes_per_span(16)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                env!("CARGO_PKG_NAME"),
            )]));

        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint.to_string());

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(trace_config)
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        info!("OpenTelemetry enabled, shipping traces to {endpoint}");

        Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
    }
}

pub fn shutdown() {
    info!("Flushing traces and stopping tracer provider");
    opentelemetry::global::shutdown_tracer_provider();
}
