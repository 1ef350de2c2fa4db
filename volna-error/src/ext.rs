use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для доменных ошибок брокера (object-safe).
///
/// Каждая ошибка сообщает свой статус-код, безопасное сообщение для
/// клиента и набор тегов для метрик. Всё, кроме `as_any`, имеет
/// разумную реализацию по умолчанию.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус-код ошибки. По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Доступ к ошибке как к [`Any`] для downcast.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно показать издателю или подписчику.
    ///
    /// Для внутренних ошибок детали скрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal broker error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Подробное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Теги для счётчиков ошибок.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Короткое имя типа ошибки (без пути модулей).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, error::Error, fmt};

    use super::*;

    #[derive(Debug)]
    struct Opaque;

    impl fmt::Display for Opaque {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "registry lock poisoned at node 7")
        }
    }

    impl Error for Opaque {}

    impl ErrorExt for Opaque {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Backpressure(usize);

    impl fmt::Display for Backpressure {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "queue of {} is full", self.0)
        }
    }

    impl Error for Backpressure {}

    impl ErrorExt for Backpressure {
        fn status_code(&self) -> StatusCode {
            StatusCode::QueueFull
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что внутренние детали не попадают клиенту.
    #[test]
    fn test_internal_errors_are_masked() {
        let e = Opaque;
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.client_message(), "Internal broker error");
        assert!(e.log_message().contains("Opaque"));
    }

    /// Тест проверяет, что для не-внутренних кодов клиент видит `Display`.
    #[test]
    fn test_client_message_passes_display() {
        let e = Backpressure(16);
        assert_eq!(e.client_message(), "queue of 16 is full");
    }

    /// Тест проверяет теги метрик и короткое имя типа.
    #[test]
    fn test_metrics_tags_and_type_name() {
        let e = Backpressure(1);
        let tags = e.metrics_tags();
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "error_type" && v == "Backpressure"));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && v == &StatusCode::QueueFull.to_string()));
    }

    #[test]
    fn test_as_any_downcast() {
        let e = Backpressure(3);
        let down = e.as_any().downcast_ref::<Backpressure>();
        assert_eq!(down.map(|b| b.0), Some(3));
    }
}
