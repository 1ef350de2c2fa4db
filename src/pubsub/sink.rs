use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::warn;
use volna_error::{ConnectorError, DeliveryError};

use super::Message;
use crate::{
    connector::{ConnectorHandle, Request},
    RecvError, TryRecvError,
};

/// Источник идентификаторов локальных приёмников.
static NEXT_LOCAL_SINK: AtomicU64 = AtomicU64::new(1);

/// Идентичность приёмника; вместе с шаблоном образует ключ уникальности
/// подписки.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkId {
    /// Подключённый клиент
    Local(u64),
    /// Получатель у внешнего провайдера
    Connector {
        connector: Arc<str>,
        recipient: Arc<str>,
    },
}

/// Приёмник сообщений. Закрытый набор вариантов.
#[derive(Debug, Clone)]
pub enum Sink {
    Local(LocalSink),
    Connector(ConnectorSink),
}

/// Результат неблокирующей доставки в приёмник.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Сообщение принято
    Delivered,
    /// Очередь заполнена, сообщение отброшено
    Dropped,
    /// Приёмник закрыт; подписку нужно удалить
    Closed,
}

/// Ограниченный канал к подключённому клиенту.
///
/// При переполнении новое сообщение отбрасывается (drop-newest).
#[derive(Clone)]
pub struct LocalSink {
    id: u64,
    capacity: usize,
    tx: mpsc::Sender<Message>,
}

/// Сторона клиента для [`LocalSink`].
///
/// Drop закрывает канал; следующая доставка вернёт [`Delivery::Closed`].
pub struct LocalReceiver {
    id: u64,
    rx: mpsc::Receiver<Message>,
}

/// Получатель внешнего провайдера, обслуживаемый коннектором.
#[derive(Clone)]
pub struct ConnectorSink {
    recipient: Arc<str>,
    handle: ConnectorHandle,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Sink {
    pub fn id(&self) -> SinkId {
        match self {
            Sink::Local(sink) => SinkId::Local(sink.id),
            Sink::Connector(sink) => SinkId::Connector {
                connector: sink.handle.name_arc(),
                recipient: sink.recipient.clone(),
            },
        }
    }

    /// Доставляет одно сообщение, не блокируясь.
    pub fn deliver(
        &self,
        msg: &Message,
    ) -> Delivery {
        match self {
            Sink::Local(sink) => match sink.try_deliver(msg.clone()) {
                Ok(()) => Delivery::Delivered,
                Err(DeliveryError::QueueFull { .. }) => Delivery::Dropped,
                Err(DeliveryError::SinkClosed) => Delivery::Closed,
            },
            Sink::Connector(sink) => match sink.deliver(msg) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Dropped,
            },
        }
    }

    pub fn as_connector(&self) -> Option<&ConnectorSink> {
        match self {
            Sink::Connector(sink) => Some(sink),
            Sink::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Sink::Local(_))
    }
}

impl LocalSink {
    /// Создаёт пару приёмник/получатель с очередью ёмкостью `capacity`.
    pub fn channel(capacity: usize) -> (LocalSink, LocalReceiver) {
        let capacity = capacity.max(1);
        let id = NEXT_LOCAL_SINK.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity);
        (LocalSink { id, capacity, tx }, LocalReceiver { id, rx })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Кладёт сообщение в очередь без ожидания.
    pub fn try_deliver(
        &self,
        msg: Message,
    ) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => DeliveryError::SinkClosed,
        })
    }
}

impl LocalReceiver {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sink_id(&self) -> SinkId {
        SinkId::Local(self.id)
    }

    /// Ожидает следующее сообщение.
    ///
    /// # Возвращает
    /// - `Ok(Message)` при получении
    /// - `Err(RecvError::Closed)` если все приёмники удалены и очередь пуста
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        self.rx.recv().await.ok_or(RecvError::Closed)
    }

    /// Ожидает сообщение не дольше `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Message, RecvError> {
        tokio::time::timeout(timeout, self.recv()).await?
    }

    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        self.rx.try_recv().map_err(Into::into)
    }

    /// Закрывает очередь: новые доставки получат `Closed`, уже
    /// принятые сообщения ещё можно дочитать.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl ConnectorSink {
    pub fn new(
        handle: ConnectorHandle,
        recipient: impl AsRef<str>,
    ) -> Self {
        Self {
            recipient: Arc::from(recipient.as_ref()),
            handle,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn connector(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &ConnectorHandle {
        &self.handle
    }

    /// Тот же коннектор, новый адрес получателя.
    pub fn with_recipient(
        &self,
        recipient: impl AsRef<str>,
    ) -> Self {
        Self::new(self.handle.clone(), recipient)
    }

    /// Ставит одиночный запрос в очередь коннектора.
    ///
    /// Роутер группирует получателей одного коннектора сам; этот путь
    /// нужен для прямой доставки одному получателю.
    pub fn deliver(
        &self,
        msg: &Message,
    ) -> Result<(), ConnectorError> {
        let request = Request::single(msg.clone(), self.recipient.clone());
        self.handle.enqueue(request).inspect_err(|err| {
            warn!(
                connector = %self.handle.name(),
                recipient = %self.recipient,
                error = %err,
                "Connector rejected delivery"
            );
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for SinkId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SinkId::Local(id) => write!(f, "local:{id}"),
            SinkId::Connector {
                connector,
                recipient,
            } => write!(f, "{connector}:{recipient}"),
        }
    }
}

impl fmt::Debug for LocalSink {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LocalSink")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl fmt::Debug for ConnectorSink {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConnectorSink")
            .field("connector", &self.handle.name())
            .field("recipient", &self.recipient)
            .finish()
    }
}

impl From<LocalSink> for Sink {
    fn from(sink: LocalSink) -> Self {
        Sink::Local(sink)
    }
}

impl From<ConnectorSink> for Sink {
    fn from(sink: ConnectorSink) -> Self {
        Sink::Connector(sink)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
