use std::any::Any;

use crate::{ErrorExt, PathError, StatusCode};

/// Отказ приёмника принять сообщение.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Очередь приёмника заполнена
    QueueFull { capacity: usize },
    /// Приёмник закрыт (клиент отключился)
    SinkClosed,
}

/// Ошибки публикации сообщений.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Превышен лимит размера тела сообщения
    MessageTooLarge { size: usize, max: usize },
    /// Сообщение от другого узла без идентификатора происхождения
    MissingOrigin { path: String },
    /// Неверный путь темы
    InvalidPath(PathError),
}

/// Ошибки регистрации и удаления подписок.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Шаблон не прошёл разбор
    MalformedPattern { pattern: String, reason: PathError },
    /// Коннектор с таким именем не зарегистрирован
    UnknownConnector { name: String },
    /// Подписка с таким дескриптором не найдена
    UnknownHandle { handle: u64 },
}

impl std::fmt::Display for DeliveryError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::QueueFull { capacity } => write!(f, "Sink queue is full (capacity {capacity})"),
            Self::SinkClosed => write!(f, "Sink is closed"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl ErrorExt for DeliveryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueFull { .. } => StatusCode::QueueFull,
            Self::SinkClosed => StatusCode::SinkClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {size} bytes (max {max})")
            }
            Self::MissingOrigin { path } => {
                write!(f, "Remote message for '{path}' carries no origin node")
            }
            Self::InvalidPath(err) => write!(f, "Invalid topic path: {err}"),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPath(err) => Some(err),
            _ => None,
        }
    }
}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MessageTooLarge { .. } => StatusCode::SizeLimit,
            Self::MissingOrigin { .. } => StatusCode::InvalidMessage,
            Self::InvalidPath(err) => err.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "pubsub_publish".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::MessageTooLarge { size, max } = self {
            tags.push(("message_size", size.to_string()));
            tags.push(("max_size", max.to_string()));
        }
        tags
    }
}

impl From<PathError> for PublishError {
    fn from(err: PathError) -> Self {
        PublishError::InvalidPath(err)
    }
}

impl std::fmt::Display for SubscribeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::MalformedPattern { pattern, reason } => {
                write!(f, "Malformed subscription pattern '{pattern}': {reason}")
            }
            Self::UnknownConnector { name } => write!(f, "Unknown connector: {name}"),
            Self::UnknownHandle { handle } => write!(f, "Unknown subscription handle: {handle}"),
        }
    }
}

impl std::error::Error for SubscribeError {}

impl ErrorExt for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedPattern { .. } => StatusCode::MalformedPattern,
            Self::UnknownConnector { .. } | Self::UnknownHandle { .. } => StatusCode::NotFound,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::MalformedPattern { pattern, .. } => {
                format!("Invalid subscription pattern: {pattern}")
            }
            other => other.to_string(),
        }
    }
}
