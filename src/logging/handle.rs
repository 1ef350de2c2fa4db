use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;

/// Держит гард файлового писателя, пока узел работает.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает файловый буфер в блокирующем потоке с ограничением по
    /// времени.
    pub async fn shutdown(mut self) {
        let Some(guard) = self.file_guard.take() else {
            return;
        };
        tracing::info!("Flushing file log");

        match tokio::time::timeout(
            self.flush_timeout,
            tokio::task::spawn_blocking(move || drop(guard)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Logging flush task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: logging flush exceeded {}ms",
                self.flush_timeout.as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет завершение без файлового слоя.
    #[tokio::test]
    async fn test_shutdown_without_file_sink() {
        let handle = LoggingHandle::new(None).with_flush_timeout(Duration::from_millis(50));
        assert!(!handle.has_file_sink());
        handle.shutdown().await;
    }

    /// Тест проверяет сброс реального гарда.
    #[tokio::test]
    async fn test_shutdown_drops_guard() {
        let tmp = tempfile::tempdir().unwrap();
        let (_layer, guard) = crate::logging::sinks::file::layer(tmp.path(), "h.log");
        let handle = LoggingHandle::new(Some(guard));
        assert!(handle.has_file_sink());
        handle.shutdown().await;
    }
}
