use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, Layer};

use super::BoxedLayer;

/// Файловый слой с суточной ротацией и неблокирующей записью.
///
/// Гард нужно держать до завершения процесса, иначе хвост буфера потеряется.
pub fn layer(
    dir: &Path,
    prefix: &str,
) -> (BoxedLayer, WorkerGuard) {
    let appender = rolling::daily(dir, prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    (layer, guard)
}
