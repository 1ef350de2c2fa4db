//! Подсистема Publish–Subscribe.
//!
//! - `path`: пути тем, шаблоны подписок и их сопоставление.
//! - `message`: сообщение и идентификатор узла.
//! - `sink`: приёмники сообщений (локальный клиент, коннектор).
//! - `registry`: дерево подписок по сегментам.
//! - `router`: штамп, раздача по снимку реестра, передача в кластер.
//! - `store`: хранилище сообщений, к которому обращается роутер.

pub mod message;
pub mod path;
pub mod registry;
pub mod router;
pub mod sink;
pub mod store;

// Публичный экспорт типов из вложенных модулей, чтобы упростить доступ к
// ним из внешнего кода.
pub use message::*;
pub use path::{matches, Path, Pattern, Segment};
pub use registry::*;
pub use router::*;
pub use sink::*;
pub use store::*;
