//! volna: ядро распределённого брокера публикаций и подписок.

/// Экспоненциальная задержка повторов для коннекторов и связей узлов.
pub mod backoff;
/// Синхронизация узлов кластера: кодек, связи, рассылка.
pub mod cluster;
/// Загрузка настроек узла.
pub mod config;
/// Коннекторы push-провайдеров: очередь, пул, повторы.
pub mod connector;
/// Типы ошибок.
pub mod error;
/// Инициализация логирования.
pub mod logging;
/// Узел брокера, собранный из настроек.
pub mod node;
/// Пути, реестр подписок, роутер.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use cluster::{ClusterConfig, ClusterSynchronizer, PeerState};
pub use config::{Settings, SettingsError};
pub use connector::{
    Connector, ConnectorConfig, ConnectorHandle, DispatchReport, Outcome, Request, Response,
    Sender, ShutdownPolicy,
};
pub use error::{
    ClusterError, ConnectorError, PathError, PublishError, RecvError, StatusCode, SubscribeError,
    TryRecvError, VolnaResult,
};
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
pub use node::BrokerNode;
pub use pubsub::{
    matches, LocalReceiver, LocalSink, Message, NodeId, Path, Pattern, Router, Sink, SinkId,
    Subscription, SubscriptionHandle, SubscriptionRegistry, TransportPort,
};
