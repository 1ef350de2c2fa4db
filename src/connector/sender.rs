use std::sync::Arc;

use async_trait::async_trait;
use volna_error::ConnectorError;

use super::{Request, Response};

/// Отправка запроса конкретному провайдеру.
///
/// Ответ должен содержать по одному итогу на каждого получателя запроса.
/// `Err` означает сбой транспорта: все получатели считаются временно
/// недоставленными.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError>;
}

#[async_trait]
impl<S: Sender + ?Sized> Sender for Arc<S> {
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<S: Sender + ?Sized> Sender for Box<S> {
    async fn send(
        &self,
        request: &Request,
    ) -> Result<Response, ConnectorError> {
        (**self).send(request).await
    }
}
