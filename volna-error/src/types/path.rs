use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора путей тем и шаблонов подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Пустой путь (включая корень `/`)
    Empty,
    /// Путь не начинается с разделителя
    NotAbsolute { path: String },
    /// Пустой сегмент (`//` или завершающий `/`)
    EmptySegment { path: String, position: usize },
    /// Wildcard в точном пути темы
    WildcardInTopic { path: String },
    /// `**` не в последней позиции шаблона
    MisplacedMultiWildcard { pattern: String, position: usize },
    /// Сегмент смешивает wildcard с литералом (`a*`, `**b`)
    PartialWildcard { pattern: String, segment: String },
}

impl std::fmt::Display for PathError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Path is empty"),
            Self::NotAbsolute { path } => write!(f, "Path '{path}' must start with '/'"),
            Self::EmptySegment { path, position } => {
                write!(f, "Path '{path}' has an empty segment at position {position}")
            }
            Self::WildcardInTopic { path } => {
                write!(f, "Topic path '{path}' must not contain wildcards")
            }
            Self::MisplacedMultiWildcard { pattern, position } => {
                write!(
                    f,
                    "Pattern '{pattern}': '**' is only allowed as the last segment (found at {position})"
                )
            }
            Self::PartialWildcard { pattern, segment } => {
                write!(f, "Pattern '{pattern}': segment '{segment}' mixes wildcard and literal")
            }
        }
    }
}

impl std::error::Error for PathError {}

impl ErrorExt for PathError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MisplacedMultiWildcard { .. } | Self::PartialWildcard { .. } => {
                StatusCode::MalformedPattern
            }
            _ => StatusCode::InvalidPath,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
