//! Tracing setup for the provider process.
//!
//! Stdout belongs to the plugin protocol, so logs always go to stderr.

use tracing_subscriber::EnvFilter;

use crate::error::ProviderError;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` when `verbose`, else `info`.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<(), ProviderError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| ProviderError::Config(format!("failed to install logger: {e}")))
}
