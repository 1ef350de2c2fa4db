//! Доставка во внешние push-провайдеры.
//!
//! - `request`: запрос к провайдеру и итоги по получателям.
//! - `sender`: трейт отправки, один на провайдера.
//! - `fcm`: разбор ответов FCM-подобного провайдера.
//! - `dispatch`: очередь, пул обработчиков, повторы и обновление реестра.

pub mod dispatch;
pub mod fcm;
pub mod request;
pub mod sender;

pub use dispatch::*;
pub use fcm::{FcmResponse, FcmResult, FcmSender, FcmTransport};
pub use request::*;
pub use sender::Sender;
