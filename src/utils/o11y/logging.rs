//! Logging setup and helpers.
use tracing::Subscriber;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
}

/// Build a tracing subscriber.
///
/// Log lines go to stderr so stdout only carries the provisioning summary.
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn build_subscriber() -> Result<impl Subscriber + Send + Sync, BuildSubscriberError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

/// Builds a closure for `Result::inspect_err` that logs the error with a
/// message, e.g. `.inspect_err(as_error!("failed to parse connection string"))`.
macro_rules! as_error {
    ($msg:literal) => {
        |error| tracing::error!(error = %error, $msg)
    };
}

pub(crate) use as_error;

/// Logs an error together with its chain of sources.
pub fn log_error(error: &(dyn std::error::Error + 'static)) {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    tracing::error!("{}", message);
}
