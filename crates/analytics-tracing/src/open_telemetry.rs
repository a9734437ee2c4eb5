use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_opentelemetry::OpenTelemetryLayer;

pub const OTLP_ENDPOINT_ENV: &str = "OPENTELEMETRY_OTLP_GRPC_ENDPOINT";

/// OTLP span export, only when an endpoint is configured. Must be called
/// from inside a tokio runtime.
pub(crate) fn init_otel_layer<S>(service_name: &str) -> Option<OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let endpoint = std::env::var(OTLP_ENDPOINT_ENV).ok()?;

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let otlp_config = sdktrace::config().with_resource(Resource::new(vec![
        opentelemetry::KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            service_name.to_string(),
        ),
    ]));

    match opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(otlp_config)
        .install_batch(runtime::Tokio)
    {
        Ok(tracer) => Some(tracing_opentelemetry::layer::<S>().with_tracer(tracer)),
        Err(e) => {
            eprintln!("Failed to create OpenTelemetry tracer with otlp exporter: {}", e);
            None
        }
    }
}
