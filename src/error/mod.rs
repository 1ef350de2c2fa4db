//! Ошибки основного крейта.
//!
//! Доменные ошибки живут в `volna-error`; здесь только ошибки локального
//! получателя сообщений.

pub mod pubsub;

pub use pubsub::{RecvError, TryRecvError};
pub use volna_error::{
    ClusterError, CodecError, ConnectorError, DeliveryError, ErrorExt, PathError, PublishError,
    ResultExt, StackError, StatusCode, SubscribeError, VolnaResult,
};
