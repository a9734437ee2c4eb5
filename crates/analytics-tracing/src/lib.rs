use std::{path::PathBuf, sync::Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod open_telemetry;
use open_telemetry::init_otel_layer;
pub use open_telemetry::OTLP_ENDPOINT_ENV;

/// `RUST_LOG` wins over `default_filter`.
fn init_env_layer(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into())
}

pub fn init_tracing_to_stdout(service_name: &str, default_filter: &str) {
    let env_layer = init_env_layer(default_filter);

    let stdout_layer = tracing_subscriber::fmt::layer().with_ansi(true);

    let telemetry_layer = init_otel_layer(service_name);

    tracing_subscriber::registry()
        .with(env_layer)
        .with(stdout_layer)
        .with(telemetry_layer)
        .init();
}

pub fn init_tracing_to_file(service_name: &str, default_filter: &str, log_dir: PathBuf) {
    let file_log_layer = {
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Failed to create log dir: {}", e);
            init_tracing_to_stdout(service_name, default_filter); // fallback to stdout tracing
            return;
        }
        let file = match std::fs::File::create(log_dir.join(format!("{}.log", service_name))) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Failed to create log file: {}", e);
                init_tracing_to_stdout(service_name, default_filter); // fallback to stdout tracing
                return;
            }
        };
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
    };

    let env_layer = init_env_layer(default_filter);
    let telemetry_layer = init_otel_layer(service_name);

    tracing_subscriber::registry()
        .with(env_layer)
        .with(file_log_layer)
        .with(telemetry_layer)
        .init();
}
