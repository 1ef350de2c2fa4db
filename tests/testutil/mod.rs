//! Общие помощники интеграционных тестов: отправители-заглушки, ответы
//! провайдера, ожидание с таймаутом.
#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use volna::{
    connector::FcmTransport, BackoffConfig, ConnectorConfig, ConnectorError, Message, Path,
    Request, Response, Sender, ShutdownPolicy,
};

/// Успешный ответ на одного получателя.
pub const SUCCESS_FCM_RESPONSE: &str = r#"{
   "multicast_id":3,
   "success":1,
   "failure":0,
   "canonical_ids":0,
   "results":[
      {
         "message_id":"da",
         "registration_id":"rId",
         "error":""
      }
   ]
}"#;

/// Ошибка `InvalidRegistration` вместе с каноническим ID.
pub const ERROR_FCM_RESPONSE: &str = r#"{
   "multicast_id":3,
   "success":0,
   "failure":1,
   "error":"InvalidRegistration",
   "canonical_ids":5,
   "results":[
      {
         "message_id":"err",
         "registration_id":"fcmCanonicalID",
         "error":"InvalidRegistration"
      }
   ]
}"#;

/// Ответ в минимальной форме, без необязательных полей.
pub const MINIMAL_INVALID_RESPONSE: &str =
    r#"{"success":0,"failure":1,"results":[{"error":"InvalidRegistration"}]}"#;

/// Таймаут ожидания по умолчанию.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Ждёт завершения future или падает с сообщением.
pub async fn expect_done<F: Future>(
    what: &str,
    fut: F,
) -> F::Output {
    match tokio::time::timeout(EXPECT_TIMEOUT, fut).await {
        Ok(out) => out,
        Err(_) => panic!("timeout in expect_done: {what}"),
    }
}

pub fn msg(
    path: &str,
    body: &'static [u8],
) -> Message {
    Message::new(Path::parse(path).unwrap(), Bytes::from_static(body))
}

/// Конфигурация коннектора с короткими задержками.
pub fn connector_config(
    name: &str,
    max_retries: u32,
    send_timeout: Duration,
) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        workers: 2,
        queue_capacity: 16,
        max_retries,
        send_timeout,
        backoff: BackoffConfig {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
            jitter_percent: 0,
        },
        shutdown: ShutdownPolicy::Drain,
    }
}

/// HTTP-уровень провайдера, отвечающий заданным телом.
///
/// Каждый вызов сообщает о себе в канал `done` и сохраняет тело запроса.
pub struct StaticTransport {
    body: &'static str,
    delay: Duration,
    calls: AtomicUsize,
    payloads: Mutex<Vec<serde_json::Value>>,
    done: mpsc::UnboundedSender<()>,
}

impl StaticTransport {
    pub fn new(
        body: &'static str,
        delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (done, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            body,
            delay,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            done,
        });
        (transport, rx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl FcmTransport for StaticTransport {
    async fn post(
        &self,
        payload: serde_json::Value,
    ) -> Result<Bytes, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().push(payload);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let _ = self.done.send(());
        Ok(Bytes::from_static(self.body.as_bytes()))
    }
}

/// Первый вызов зависает дольше таймаута отправки, следующие доставляют.
pub struct StallOnce {
    stall: Duration,
    calls: AtomicUsize,
}

impl StallOnce {
    pub fn new(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for StallOnce {
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.stall).await;
        }
        Ok(Response::delivered(request.recipients().len()))
    }
}

/// Отвечает по адресу получателя: итог берётся из функции.
pub struct ByAddress<F> {
    outcome: F,
    requests: Mutex<Vec<Vec<String>>>,
}

impl<F> ByAddress<F>
where
    F: Fn(&str) -> volna::Outcome + Send + Sync + 'static,
{
    pub fn new(outcome: F) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Адреса каждого полученного запроса по порядку.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl<F> Sender for ByAddress<F>
where
    F: Fn(&str) -> volna::Outcome + Send + Sync + 'static,
{
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError> {
        let addresses: Vec<String> = request.addresses().map(str::to_string).collect();
        let outcomes = addresses.iter().map(|a| (self.outcome)(a)).collect();
        self.requests.lock().push(addresses);
        Ok(Response::new(outcomes))
    }
}
