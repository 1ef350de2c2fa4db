use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use volna_error::{PublishError, SubscribeError};

use super::{
    Delivery, Message, MessageStore, NodeId, Pattern, Sink, SinkId, Subscription,
    SubscriptionHandle, SubscriptionRegistry,
};
use crate::connector::{ConnectorHandle, Request};

/// Сдвиг миллисекунд старта процесса в счётчике идентификаторов: младшие
/// биты отданы под номера сообщений.
const ID_EPOCH_SHIFT: u32 = 16;

/// Начальный идентификатор сообщений процесса.
///
/// Узел, перезапущенный с тем же `NodeId`, продолжает с большего значения,
/// и узлы-соседи не принимают его новые сообщения за повторы.
fn id_epoch() -> u64 {
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    (millis << ID_EPOCH_SHIFT).max(1)
}

/// Контракт транспорта: всё, что клиентский слой передаёт брокеру.
pub trait TransportPort: Send + Sync {
    /// Публикация сообщения от клиента.
    fn on_message(
        &self,
        msg: Message,
    ) -> Result<Message, PublishError>;
    /// Регистрация подписки по строковому шаблону.
    fn on_subscribe(
        &self,
        pattern: &str,
        sink: Sink,
        user_filter: Option<&str>,
    ) -> Result<SubscriptionHandle, SubscribeError>;
    /// Явная отписка.
    fn on_unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<(), SubscribeError>;
    /// Клиент отключился: удалить все его подписки.
    fn on_sink_closed(
        &self,
        sink: &SinkId,
    ) -> usize;
}

/// Параметры роутера.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub node_id: NodeId,
    /// Лимит размера тела сообщения в байтах
    pub max_message_size: usize,
    /// Размер окна дедупликации `(origin, id)` для сообщений от других
    /// узлов; `0` отключает окно
    pub dedup_window: usize,
}

/// Передача локальных сообщений синхронизатору кластера.
///
/// Очередь ограничена; при переполнении сообщение для репликации
/// отбрасывается и учитывается в статистике.
#[derive(Debug, Clone)]
pub struct Replicator {
    tx: mpsc::Sender<Message>,
}

/// Счётчики роутера.
#[derive(Debug, Default)]
pub struct RouterStats {
    published: AtomicU64,
    remote_received: AtomicU64,
    duplicates: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    sinks_closed: AtomicU64,
    connector_rejected: AtomicU64,
    replicated: AtomicU64,
    replication_dropped: AtomicU64,
    store_failures: AtomicU64,
}

/// Снимок счётчиков роутера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub published: u64,
    pub remote_received: u64,
    pub duplicates: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub sinks_closed: u64,
    pub connector_rejected: u64,
    pub replicated: u64,
    pub replication_dropped: u64,
    pub store_failures: u64,
}

/// Роутер сообщений.
///
/// Штампует сообщения, раздаёт их подходящим приёмникам по снимку реестра
/// и передаёт локально созданные сообщения в репликацию. Правило одного
/// перехода проверяется только здесь, в [`Router::replicate`].
pub struct Router {
    node_id: NodeId,
    registry: Arc<SubscriptionRegistry>,
    next_id: AtomicU64,
    max_message_size: usize,
    replicator: Option<Replicator>,
    store: Option<Arc<dyn MessageStore>>,
    seen: Option<Mutex<LruCache<(NodeId, u64), ()>>>,
    stats: RouterStats,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Replicator {
    /// Создаёт передатчик и приёмную сторону для синхронизатора.
    pub fn channel(capacity: usize) -> (Replicator, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Replicator { tx }, rx)
    }

    fn hand_off(
        &self,
        msg: Message,
    ) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            remote_received: self.remote_received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sinks_closed: self.sinks_closed.load(Ordering::Relaxed),
            connector_rejected: self.connector_rejected.load(Ordering::Relaxed),
            replicated: self.replicated.load(Ordering::Relaxed),
            replication_dropped: self.replication_dropped.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let seen = NonZeroUsize::new(config.dedup_window).map(|n| Mutex::new(LruCache::new(n)));
        Self {
            node_id: config.node_id,
            registry,
            next_id: AtomicU64::new(id_epoch()),
            max_message_size: config.max_message_size,
            replicator: None,
            store: None,
            seen,
            stats: RouterStats::default(),
        }
    }

    /// Подключает репликацию в кластер.
    pub fn with_replicator(
        mut self,
        replicator: Replicator,
    ) -> Self {
        self.replicator = Some(replicator);
        self
    }

    /// Подключает хранилище для локальных публикаций.
    pub fn with_store(
        mut self,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Публикует сообщение.
    ///
    /// Проставляет `id` и `origin`, если их нет, раздаёт локальным
    /// приёмникам и коннекторам, затем передаёт в репликацию, если
    /// сообщение создано на этом узле. Ошибка возможна только при
    /// некорректном сообщении; сбои приёмников видны в статистике.
    pub fn publish(
        &self,
        msg: Message,
    ) -> Result<Message, PublishError> {
        self.check_size(&msg)?;
        let msg = msg.stamped(&self.node_id, || self.next_id.fetch_add(1, Ordering::Relaxed));
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        trace!(path = %msg.path(), id = ?msg.id(), "Publishing message");

        let local = msg.origin() == Some(&self.node_id);
        if local {
            self.store(&msg);
        }
        self.fan_out(&msg);
        if local {
            self.replicate(&msg);
        }
        Ok(msg)
    }

    /// Раздаёт сообщение от другого узла только локальным приёмникам.
    ///
    /// Повтор той же пары `(origin, id)` в пределах окна дедупликации
    /// игнорируется. Возвращает `false`, если сообщение отброшено.
    pub fn deliver_remote(
        &self,
        msg: Message,
    ) -> Result<bool, PublishError> {
        self.check_size(&msg)?;
        let Some(key) = msg.dedup_key() else {
            return Err(PublishError::MissingOrigin {
                path: msg.path().to_string(),
            });
        };
        self.stats.remote_received.fetch_add(1, Ordering::Relaxed);

        if key.0 == self.node_id || self.seen_before(key) {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(path = %msg.path(), origin = %msg.origin().map(|o| o.as_str()).unwrap_or_default(), "Duplicate remote message dropped");
            return Ok(false);
        }

        self.fan_out(&msg);
        Ok(true)
    }

    fn check_size(
        &self,
        msg: &Message,
    ) -> Result<(), PublishError> {
        let size = msg.body().len();
        if size > self.max_message_size {
            return Err(PublishError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn seen_before(
        &self,
        key: (NodeId, u64),
    ) -> bool {
        match &self.seen {
            Some(seen) => seen.lock().put(key, ()).is_some(),
            None => false,
        }
    }

    /// Раздача по снимку реестра.
    ///
    /// Подписки коннекторов группируются: один запрос на коннектор.
    fn fan_out(
        &self,
        msg: &Message,
    ) {
        let snapshot = self.registry.matching_sinks(msg);
        let mut groups: Vec<(ConnectorHandle, Vec<Arc<Subscription>>)> = Vec::new();

        for sub in snapshot {
            match sub.sink() {
                Sink::Local(_) => self.deliver_local(&sub, msg),
                Sink::Connector(sink) => {
                    match groups
                        .iter_mut()
                        .find(|(handle, _)| handle.name() == sink.connector())
                    {
                        Some((_, subs)) => subs.push(sub.clone()),
                        None => groups.push((sink.handle().clone(), vec![sub.clone()])),
                    }
                }
            }
        }

        for (handle, subs) in groups {
            let recipients = subs.len();
            if let Err(err) = handle.enqueue(Request::multicast(msg.clone(), &subs)) {
                self.stats.connector_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    connector = %handle.name(),
                    path = %msg.path(),
                    recipients,
                    error = %err,
                    "Connector rejected request"
                );
            }
        }
    }

    fn deliver_local(
        &self,
        sub: &Subscription,
        msg: &Message,
    ) {
        match sub.sink().deliver(msg) {
            Delivery::Delivered => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Dropped => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(handle = %sub.handle(), path = %msg.path(), "Sink queue full, message dropped");
            }
            Delivery::Closed => {
                self.stats.sinks_closed.fetch_add(1, Ordering::Relaxed);
                self.registry.unsubscribe(sub.handle());
                debug!(handle = %sub.handle(), "Sink closed, subscription removed");
            }
        }
    }

    /// Единственная точка передачи в кластер: только сообщения этого узла.
    fn replicate(
        &self,
        msg: &Message,
    ) {
        if msg.origin() != Some(&self.node_id) {
            return;
        }
        let Some(replicator) = &self.replicator else {
            return;
        };
        if replicator.hand_off(msg.clone()) {
            self.stats.replicated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.replication_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(path = %msg.path(), "Replication queue full, message not forwarded");
        }
    }

    fn store(
        &self,
        msg: &Message,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.append(msg) {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            warn!(path = %msg.path(), error = %err, "Failed to append message to store");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Router
////////////////////////////////////////////////////////////////////////////////

impl TransportPort for Router {
    fn on_message(
        &self,
        msg: Message,
    ) -> Result<Message, PublishError> {
        self.publish(msg)
    }

    fn on_subscribe(
        &self,
        pattern: &str,
        sink: Sink,
        user_filter: Option<&str>,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        let parsed = Pattern::parse(pattern).map_err(|reason| SubscribeError::MalformedPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        Ok(self.registry.subscribe(parsed, sink, user_filter))
    }

    fn on_unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<(), SubscribeError> {
        self.registry
            .unsubscribe(handle)
            .map(|_| ())
            .ok_or(SubscribeError::UnknownHandle {
                handle: handle.as_u64(),
            })
    }

    fn on_sink_closed(
        &self,
        sink: &SinkId,
    ) -> usize {
        self.registry.unsubscribe_sink(sink)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("node_id", &self.node_id)
            .field("subscriptions", &self.registry.len())
            .field("replication", &self.replicator.is_some())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
