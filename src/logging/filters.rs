use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Фильтр: сначала `RUST_LOG`, затем директива из конфигурации, в крайнем
/// случае `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(&config.level).unwrap_or_else(|e| {
            eprintln!(
                "Invalid log filter directive from config ('{}'): {}; falling back to 'info'",
                config.level, e
            );
            EnvFilter::new("info")
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use serial_test::serial;

    use super::*;

    /// Тест проверяет, что без `RUST_LOG` используется директива конфигурации.
    #[test]
    #[serial]
    fn test_filter_from_config_without_env() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "volna=debug".to_string(),
            ..Default::default()
        };
        let filter = build_filter_from_config(&cfg);
        assert!(filter.to_string().contains("volna=debug"));
    }

    /// Тест проверяет приоритет `RUST_LOG` над конфигурацией.
    #[test]
    #[serial]
    fn test_env_overrides_config() {
        env::set_var("RUST_LOG", "warn");
        let filter = build_filter_from_config(&LoggingConfig::default());
        env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "warn");
    }

    /// Тест проверяет откат на `info` при неверной директиве.
    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "volna=notalevel".to_string(),
            ..Default::default()
        };
        assert_eq!(build_filter_from_config(&cfg).to_string(), "info");
    }
}
