pub mod console;
pub mod file;

use tracing_subscriber::{registry::Registry, Layer};

/// Слой, который собирается в общий стек подписчика.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;
