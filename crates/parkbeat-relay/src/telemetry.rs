use parkbeat_relay_cli::{CliArgs, LogFormat};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

pub fn formatting_layer<S>(args: &CliArgs) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match args.log_format {
        LogFormat::Plain => Box::new(tracing_subscriber::fmt::layer()),
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
        LogFormat::Pretty => Box::new(tracing_subscriber::fmt::layer().pretty()),
    }
}

pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
