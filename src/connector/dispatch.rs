use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    select,
    sync::{broadcast, mpsc, Semaphore},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use volna_error::ConnectorError;

use super::{Outcome, Recipient, Request, Sender};
use crate::{
    backoff::{BackoffConfig, ExponentialBackoff},
    pubsub::{ConnectorSink, Sink, SubscriptionRegistry},
};

/// Ёмкость канала отчётов о доставке.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Что делать с очередью при остановке коннектора.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Обработать все запросы, уже стоящие в очереди
    #[default]
    Drain,
    /// Отбросить очередь, дождаться только текущих отправок
    Discard,
}

/// Параметры коннектора.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub name: String,
    /// Максимум одновременных обращений к провайдеру
    pub workers: usize,
    pub queue_capacity: usize,
    /// Число повторов после первой попытки
    pub max_retries: u32,
    pub send_timeout: Duration,
    pub backoff: BackoffConfig,
    pub shutdown: ShutdownPolicy,
}

/// Счётчики коннектора.
#[derive(Debug, Default)]
pub struct ConnectorStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    sends: AtomicU64,
    transport_errors: AtomicU64,
    delivered: AtomicU64,
    removed: AtomicU64,
    replaced: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    discarded: AtomicU64,
}

/// Снимок счётчиков коннектора.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStatsSnapshot {
    pub enqueued: u64,
    pub rejected: u64,
    pub sends: u64,
    pub transport_errors: u64,
    pub delivered: u64,
    pub removed: u64,
    pub replaced: u64,
    pub retries: u64,
    pub exhausted: u64,
    pub discarded: u64,
}

/// Итог обработки одного запроса.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub connector: Arc<str>,
    pub path: String,
    /// Число вызовов `Sender::send`
    pub attempts: u32,
    pub delivered: Vec<Arc<str>>,
    /// Получатели, чьи подписки удалены после постоянной ошибки
    pub removed: Vec<Arc<str>>,
    /// Пары `(старый адрес, новый адрес)`
    pub replaced: Vec<(Arc<str>, Arc<str>)>,
    /// Получатели, не доставленные после всех повторов
    pub failed: Vec<Arc<str>>,
}

/// Сторона постановки в очередь. Дёшево клонируется.
#[derive(Clone)]
pub struct ConnectorHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: Arc<str>,
    capacity: usize,
    tx: mpsc::Sender<Request>,
    stats: Arc<ConnectorStats>,
    cancel: CancellationToken,
}

/// Коннектор к одному провайдеру: ограниченная очередь и пул обработчиков.
///
/// Диспетчер читает очередь и берёт разрешение семафора перед каждым
/// запросом, так что одновременных отправок не больше `workers`.
pub struct Connector {
    handle: ConnectorHandle,
    reports: broadcast::Sender<DispatchReport>,
    tracker: TaskTracker,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Общее состояние обработчиков запросов.
struct Worker {
    config: ConnectorConfig,
    sender: Arc<dyn Sender>,
    registry: Arc<SubscriptionRegistry>,
    handle: ConnectorHandle,
    reports: broadcast::Sender<DispatchReport>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectorStats {
    pub fn snapshot(&self) -> ConnectorStatsSnapshot {
        ConnectorStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    fn add(
        counter: &AtomicU64,
        n: usize,
    ) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

impl ConnectorHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.inner.name.clone()
    }

    pub fn stats(&self) -> ConnectorStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Ставит запрос в очередь без ожидания.
    ///
    /// Полная очередь даёт `QueueFull`: запрос отклоняется, а не
    /// буферизуется. Запрос без получателей принимается и игнорируется.
    pub fn enqueue(
        &self,
        request: Request,
    ) -> Result<(), ConnectorError> {
        if request.recipients().is_empty() {
            return Ok(());
        }
        if self.inner.cancel.is_cancelled() {
            return Err(ConnectorError::ShuttingDown {
                connector: self.inner.name.to_string(),
            });
        }
        match self.inner.tx.try_send(request) {
            Ok(()) => {
                self.inner.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ConnectorError::QueueFull {
                    connector: self.inner.name.to_string(),
                    capacity: self.inner.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ConnectorError::ShuttingDown {
                connector: self.inner.name.to_string(),
            }),
        }
    }
}

impl Connector {
    /// Запускает коннектор: диспетчер очереди начинает работу сразу.
    pub fn start<S: Sender>(
        config: ConnectorConfig,
        sender: S,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let handle = ConnectorHandle {
            inner: Arc::new(HandleInner {
                name: Arc::from(config.name.as_str()),
                capacity,
                tx,
                stats: Arc::new(ConnectorStats::default()),
                cancel: CancellationToken::new(),
            }),
        };
        let tracker = TaskTracker::new();

        info!(
            connector = %config.name,
            workers = config.workers,
            queue = capacity,
            "Connector started"
        );

        let worker = Arc::new(Worker {
            config,
            sender: Arc::new(sender),
            registry,
            handle: handle.clone(),
            reports: reports.clone(),
        });
        let dispatcher = tokio::spawn(dispatch_loop(worker, rx, tracker.clone()));

        Self {
            handle,
            reports,
            tracker,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> ConnectorHandle {
        self.handle.clone()
    }

    /// Приёмник для адреса получателя у этого провайдера.
    pub fn sink(
        &self,
        recipient: impl AsRef<str>,
    ) -> Sink {
        Sink::Connector(ConnectorSink::new(self.handle.clone(), recipient))
    }

    pub fn enqueue(
        &self,
        request: Request,
    ) -> Result<(), ConnectorError> {
        self.handle.enqueue(request)
    }

    /// Поток отчётов о каждом обработанном запросе.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DispatchReport> {
        self.reports.subscribe()
    }

    pub fn stats(&self) -> ConnectorStatsSnapshot {
        self.handle.stats()
    }

    /// Останавливает коннектор.
    ///
    /// Новые запросы отклоняются; очередь обрабатывается или отбрасывается
    /// по [`ShutdownPolicy`]; текущие отправки завершаются.
    pub async fn shutdown(&self) {
        self.handle.inner.cancel.cancel();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.await {
                error!(connector = %self.name(), error = %err, "Connector dispatcher panicked");
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!(connector = %self.name(), "Connector stopped");
    }
}

/// Читает очередь и раздаёт запросы обработчикам в пределах пула.
async fn dispatch_loop(
    worker: Arc<Worker>,
    mut rx: mpsc::Receiver<Request>,
    tracker: TaskTracker,
) {
    let cancel = worker.handle.inner.cancel.clone();
    let pool = Arc::new(Semaphore::new(worker.config.workers.max(1)));
    let mut pending: Option<Request> = None;

    loop {
        let request = select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };
        let permit = select! {
            biased;
            _ = cancel.cancelled() => {
                pending = Some(request);
                break;
            }
            permit = pool.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let worker = worker.clone();
        tracker.spawn(async move {
            worker.process(request).await;
            drop(permit);
        });
    }

    rx.close();
    match worker.config.shutdown {
        ShutdownPolicy::Drain => {
            let mut drained = 0usize;
            while let Some(request) = match pending.take() {
                Some(request) => Some(request),
                None => rx.recv().await,
            } {
                let Ok(permit) = pool.clone().acquire_owned().await else {
                    break;
                };
                drained += 1;
                let worker = worker.clone();
                tracker.spawn(async move {
                    worker.process(request).await;
                    drop(permit);
                });
            }
            debug!(connector = %worker.handle.name(), drained, "Connector queue drained");
        }
        ShutdownPolicy::Discard => {
            let mut discarded = pending.take().map_or(0, |_| 1);
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            ConnectorStats::add(&worker.handle.inner.stats.discarded, discarded);
            if discarded > 0 {
                warn!(connector = %worker.handle.name(), discarded, "Connector queue discarded on shutdown");
            }
        }
    }
}

impl Worker {
    fn stats(&self) -> &ConnectorStats {
        &self.handle.inner.stats
    }

    /// Остановка с `Discard`: повторы прекращаются.
    fn discarding(&self) -> bool {
        self.config.shutdown == ShutdownPolicy::Discard && self.handle.is_shutting_down()
    }

    /// Пауза перед повтором; при `Discard` прерывается остановкой.
    async fn wait_backoff(
        &self,
        delay: Duration,
    ) {
        if self.config.shutdown == ShutdownPolicy::Discard {
            select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.handle.inner.cancel.cancelled() => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    /// Отправляет запрос, повторяя временно недоставленных получателей.
    async fn process(
        &self,
        request: Request,
    ) {
        let mut report = DispatchReport {
            connector: self.handle.name_arc(),
            path: request.message().path().to_string(),
            ..Default::default()
        };
        let mut backoff = ExponentialBackoff::new(self.config.backoff);
        let mut pending: Vec<Recipient> = request.recipients().to_vec();

        loop {
            report.attempts += 1;
            let attempt = request.subset(pending);
            let outcomes = self.send_once(&attempt).await;

            let mut retry = Vec::new();
            for (recipient, outcome) in attempt.recipients().iter().zip(outcomes) {
                match outcome {
                    Outcome::Delivered => {
                        report.delivered.push(recipient.address.clone());
                    }
                    Outcome::PermanentFailure(reason) => {
                        self.remove_recipient(recipient, &reason);
                        report.removed.push(recipient.address.clone());
                    }
                    Outcome::CanonicalIdChanged(new_address) => {
                        let new_address: Arc<str> = Arc::from(new_address.as_str());
                        self.replace_recipient(recipient, &new_address);
                        report.delivered.push(recipient.address.clone());
                        report
                            .replaced
                            .push((recipient.address.clone(), new_address));
                    }
                    Outcome::TransientFailure(reason) => {
                        debug!(
                            connector = %self.handle.name(),
                            recipient = %recipient.address,
                            reason = %reason,
                            "Transient delivery failure"
                        );
                        retry.push(recipient.clone());
                    }
                }
            }

            if retry.is_empty() {
                break;
            }
            let retries_done = report.attempts - 1;
            let mut give_up = retries_done >= self.config.max_retries || self.discarding();
            if !give_up {
                self.wait_backoff(backoff.next_delay()).await;
                give_up = self.discarding();
            }
            if give_up {
                let err = ConnectorError::RetriesExhausted {
                    connector: self.handle.name().to_string(),
                    attempts: report.attempts,
                    recipients: retry.len(),
                };
                error!(connector = %self.handle.name(), path = %report.path, error = %err, "Delivery failed");
                ConnectorStats::add(&self.stats().exhausted, retry.len());
                report.failed = retry.into_iter().map(|r| r.address).collect();
                break;
            }

            self.stats().retries.fetch_add(1, Ordering::Relaxed);
            pending = retry;
        }

        ConnectorStats::add(&self.stats().delivered, report.delivered.len());
        // Отчёт без подписчиков никому не нужен.
        let _ = self.reports.send(report);
    }

    /// Одна попытка отправки; сбой транспорта или тайм-аут делают всех
    /// получателей временно недоставленными.
    async fn send_once(
        &self,
        request: &Request,
    ) -> Vec<Outcome> {
        let count = request.recipients().len();
        self.stats().sends.fetch_add(1, Ordering::Relaxed);

        let result = match timeout(self.config.send_timeout, self.sender.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::SendTimeout {
                timeout_ms: u64::try_from(self.config.send_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(response) => {
                let mut outcomes = response.into_outcomes();
                if outcomes.len() != count {
                    warn!(
                        connector = %self.handle.name(),
                        expected = count,
                        got = outcomes.len(),
                        "Response size does not match recipients"
                    );
                }
                outcomes.resize(count, Outcome::TransientFailure("missing outcome".to_string()));
                outcomes
            }
            Err(err) => {
                self.stats().transport_errors.fetch_add(1, Ordering::Relaxed);
                warn!(connector = %self.handle.name(), error = %err, "Send failed");
                vec![Outcome::TransientFailure(err.to_string()); count]
            }
        }
    }

    fn remove_recipient(
        &self,
        recipient: &Recipient,
        reason: &str,
    ) {
        self.stats().removed.fetch_add(1, Ordering::Relaxed);
        if let Some(handle) = recipient.handle {
            self.registry.unsubscribe(handle);
        }
        info!(
            connector = %self.handle.name(),
            recipient = %recipient.address,
            reason,
            "Recipient permanently invalid, subscription removed"
        );
    }

    fn replace_recipient(
        &self,
        recipient: &Recipient,
        new_address: &Arc<str>,
    ) {
        self.stats().replaced.fetch_add(1, Ordering::Relaxed);
        if let Some(handle) = recipient.handle {
            let sink = Sink::Connector(ConnectorSink::new(self.handle.clone(), new_address));
            self.registry.replace_sink(handle, sink);
        }
        info!(
            connector = %self.handle.name(),
            from = %recipient.address,
            to = %new_address,
            "Canonical recipient id changed"
        );
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for ConnectorHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl fmt::Debug for Connector {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
