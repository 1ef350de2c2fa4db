use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки коннектора push-провайдера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Очередь запросов коннектора заполнена
    QueueFull { connector: String, capacity: usize },
    /// Коннектор остановлен и не принимает запросы
    ShuttingDown { connector: String },
    /// Сбой транспорта при обращении к провайдеру
    Transport { reason: String },
    /// Провайдер не ответил за отведённое время
    SendTimeout { timeout_ms: u64 },
    /// Ответ провайдера не удалось разобрать
    InvalidResponse { reason: String },
    /// Повторные попытки исчерпаны
    RetriesExhausted {
        connector: String,
        attempts: u32,
        recipients: usize,
    },
    /// Провайдер окончательно отклонил получателя
    PermanentFailure { recipient: String, reason: String },
    /// Коннектор с таким именем уже зарегистрирован на узле
    AlreadyRegistered { connector: String },
}

impl std::fmt::Display for ConnectorError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::QueueFull {
                connector,
                capacity,
            } => write!(
                f,
                "Connector '{connector}' queue is full (capacity {capacity})"
            ),
            Self::ShuttingDown { connector } => {
                write!(f, "Connector '{connector}' is shutting down")
            }
            Self::Transport { reason } => write!(f, "Provider transport failure: {reason}"),
            Self::SendTimeout { timeout_ms } => {
                write!(f, "Provider did not answer within {timeout_ms}ms")
            }
            Self::InvalidResponse { reason } => write!(f, "Invalid provider response: {reason}"),
            Self::RetriesExhausted {
                connector,
                attempts,
                recipients,
            } => write!(
                f,
                "Connector '{connector}' gave up after {attempts} attempts ({recipients} recipients undelivered)"
            ),
            Self::PermanentFailure { recipient, reason } => {
                write!(f, "Recipient '{recipient}' rejected permanently: {reason}")
            }
            Self::AlreadyRegistered { connector } => {
                write!(f, "Connector '{connector}' is already registered")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

impl ErrorExt for ConnectorError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueFull { .. } => StatusCode::QueueFull,
            Self::ShuttingDown { .. } => StatusCode::ShuttingDown,
            Self::Transport { .. } => StatusCode::TransientFailure,
            Self::SendTimeout { .. } => StatusCode::Timeout,
            Self::InvalidResponse { .. } => StatusCode::DecodingError,
            Self::RetriesExhausted { .. } => StatusCode::RetriesExhausted,
            Self::PermanentFailure { .. } => StatusCode::PermanentFailure,
            Self::AlreadyRegistered { .. } => StatusCode::AlreadyExists,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "connector".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::QueueFull { connector, .. }
            | Self::ShuttingDown { connector }
            | Self::AlreadyRegistered { connector }
            | Self::RetriesExhausted { connector, .. } => {
                tags.push(("connector", connector.clone()));
            }
            _ => {}
        }
        tags
    }
}

impl ConnectorError {
    /// Является ли сбой временным (запрос стоит повторить).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::SendTimeout { .. } | Self::InvalidResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConnectorError::SendTimeout { timeout_ms: 50 }.is_transient());
        assert!(ConnectorError::Transport {
            reason: "reset".to_string()
        }
        .is_transient());
        assert!(!ConnectorError::PermanentFailure {
            recipient: "r1".to_string(),
            reason: "NotRegistered".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_queue_full_tags() {
        let err = ConnectorError::QueueFull {
            connector: "fcm".to_string(),
            capacity: 2,
        };
        assert_eq!(err.status_code(), StatusCode::QueueFull);
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "connector" && v == "fcm"));
    }
}
