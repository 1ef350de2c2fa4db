//! Ответы FCM-подобного провайдера push-уведомлений.
//!
//! Ответ на групповой запрос содержит счётчики и массив `results`, по
//! одному элементу на получателя в порядке запроса.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::trace;
use volna_error::ConnectorError;

use super::{Outcome, Request, Response, Sender};

/// Ошибки провайдера, после которых получатель недействителен.
pub const PERMANENT_ERRORS: &[&str] = &[
    "InvalidRegistration",
    "NotRegistered",
    "MismatchSenderId",
    "MissingRegistration",
    "InvalidPackageName",
];

/// Ответ провайдера как есть.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmResponse {
    pub multicast_id: i64,
    pub success: u32,
    pub failure: u32,
    pub canonical_ids: u32,
    pub results: Vec<FcmResult>,
}

/// Результат для одного получателя.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmResult {
    pub message_id: String,
    pub registration_id: String,
    pub error: String,
}

/// HTTP-уровень провайдера: принимает JSON-тело, возвращает тело ответа.
#[async_trait]
pub trait FcmTransport: Send + Sync + 'static {
    async fn post(
        &self,
        payload: serde_json::Value,
    ) -> Result<Bytes, ConnectorError>;
}

#[async_trait]
impl<T: FcmTransport + ?Sized> FcmTransport for Arc<T> {
    async fn post(
        &self,
        payload: serde_json::Value,
    ) -> Result<Bytes, ConnectorError> {
        (**self).post(payload).await
    }
}

/// [`Sender`] для FCM: собирает групповой запрос и разбирает ответ.
pub struct FcmSender<T> {
    transport: T,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl FcmResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ConnectorError> {
        serde_json::from_slice(body).map_err(|e| ConnectorError::InvalidResponse {
            reason: e.to_string(),
        })
    }

    /// Приводит ответ к итогам по получателям.
    ///
    /// Нулевое число неудач и отсутствие канонических ID означают доставку
    /// всем. Получатели без элемента в `results` считаются временным сбоем.
    pub fn into_response(
        self,
        addresses: &[&str],
    ) -> Response {
        if self.failure == 0 && self.canonical_ids == 0 {
            return Response::delivered(addresses.len());
        }

        let outcomes = addresses
            .iter()
            .enumerate()
            .map(|(i, address)| match self.results.get(i) {
                Some(result) => classify(result, address, self.canonical_ids > 0),
                None => Outcome::TransientFailure("missing result".to_string()),
            })
            .collect();
        Response::new(outcomes)
    }
}

/// Классифицирует результат одного получателя.
pub fn classify(
    result: &FcmResult,
    address: &str,
    has_canonical: bool,
) -> Outcome {
    if !result.error.is_empty() {
        return classify_error(&result.error);
    }
    if has_canonical && !result.registration_id.is_empty() && result.registration_id != address
    {
        return Outcome::CanonicalIdChanged(result.registration_id.clone());
    }
    Outcome::Delivered
}

/// Строка ошибки провайдера в итог; неизвестные ошибки временные.
pub fn classify_error(error: &str) -> Outcome {
    if PERMANENT_ERRORS.contains(&error) {
        Outcome::PermanentFailure(error.to_string())
    } else {
        Outcome::TransientFailure(error.to_string())
    }
}

impl<T: FcmTransport> FcmSender<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Тело группового запроса: адреса и данные сообщения.
    pub fn payload(request: &Request) -> serde_json::Value {
        let msg = request.message();
        json!({
            "registration_ids": request.addresses().collect::<Vec<_>>(),
            "data": {
                "path": msg.path().as_str(),
                "message": String::from_utf8_lossy(msg.body()),
                "id": msg.id(),
                "origin": msg.origin().map(|o| o.as_str()),
                "user_id": msg.user_id(),
            }
        })
    }
}

#[async_trait]
impl<T: FcmTransport> Sender for FcmSender<T> {
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError> {
        let body = self.transport.post(Self::payload(request)).await?;
        let parsed = FcmResponse::parse(&body)?;
        trace!(
            multicast_id = parsed.multicast_id,
            success = parsed.success,
            failure = parsed.failure,
            "FCM response"
        );
        let addresses: Vec<&str> = request.addresses().collect();
        Ok(parsed.into_response(&addresses))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
