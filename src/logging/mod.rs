//! Инициализация `tracing`: фильтр, консольный и файловый слои.

pub mod config;
mod filters;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig, LoggingError};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Устанавливает глобальный подписчик.
///
/// Возвращённый [`LoggingHandle`] нужно держать до завершения процесса.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(config);
    let mut layers: Vec<sinks::BoxedLayer> = Vec::new();

    if config.console_enabled {
        layers.push(sinks::console::layer_with_config(config));
    }

    let file_guard = match &config.file_dir {
        Some(dir) => {
            let (layer, guard) = sinks::file::layer(dir, &config.file_prefix);
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        file_dir = ?config.file_dir,
        "Logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
