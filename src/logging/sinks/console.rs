use tracing_subscriber::{fmt, Layer};

use super::BoxedLayer;
use crate::logging::config::{LogFormat, LoggingConfig};

/// Консольный слой в формате из конфигурации.
pub fn layer_with_config(config: &LoggingConfig) -> BoxedLayer {
    let base = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(config.with_ansi)
        .with_target(true);

    match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base.json().with_current_span(true).boxed(),
    }
}
