use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Формат консольного вывода.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Настройки логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень или директива `EnvFilter`, например `info` или
    /// `volna=debug,tokio=warn`
    pub level: String,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    /// Каталог для файлового лога с суточной ротацией; `None` отключает
    pub file_dir: Option<PathBuf>,
    pub file_prefix: String,
}

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("global subscriber already installed")]
    AlreadyInitialized,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            console_enabled: true,
            with_ansi: true,
            file_dir: None,
            file_prefix: "volna.log".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Проверяет директиву фильтра.
    pub fn validate(&self) -> Result<(), LoggingError> {
        tracing_subscriber::EnvFilter::try_new(&self.level).map_err(|e| {
            LoggingError::InvalidDirective {
                directive: self.level.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Создаёт каталог файлового лога, если он задан.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if let Some(dir) = &self.file_dir {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
