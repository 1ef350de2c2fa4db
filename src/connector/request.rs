use std::sync::Arc;

use crate::pubsub::{Message, Subscription, SubscriptionHandle};

/// Получатель в запросе к провайдеру.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Подписка, из которой получатель взят; `None` для прямой доставки
    pub handle: Option<SubscriptionHandle>,
    /// Адрес у провайдера (registration id, токен устройства)
    pub address: Arc<str>,
}

/// Запрос к провайдеру: одно сообщение, один или несколько получателей.
#[derive(Debug, Clone)]
pub struct Request {
    message: Message,
    recipients: Vec<Recipient>,
}

/// Итог доставки одному получателю.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    /// Временный сбой; получатель повторяется отдельно от остальных
    TransientFailure(String),
    /// Получатель недействителен; подписка удаляется
    PermanentFailure(String),
    /// Провайдер выдал новый адрес получателя
    CanonicalIdChanged(String),
}

/// Ответ провайдера, приведённый к итогам по получателям.
///
/// `outcomes[i]` относится к `recipients[i]` запроса.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    outcomes: Vec<Outcome>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Request {
    /// Запрос к одному получателю без привязки к подписке.
    pub fn single(
        message: Message,
        address: Arc<str>,
    ) -> Self {
        Self {
            message,
            recipients: vec![Recipient {
                handle: None,
                address,
            }],
        }
    }

    /// Групповой запрос по подпискам одного коннектора.
    ///
    /// Подписки с локальными приёмниками пропускаются.
    pub fn multicast(
        message: Message,
        subscriptions: &[Arc<Subscription>],
    ) -> Self {
        let recipients = subscriptions
            .iter()
            .filter_map(|sub| {
                sub.sink().as_connector().map(|sink| Recipient {
                    handle: Some(sub.handle()),
                    address: Arc::from(sink.recipient()),
                })
            })
            .collect();
        Self {
            message,
            recipients,
        }
    }

    pub fn with_recipients(
        message: Message,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            message,
            recipients,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Адреса получателей по порядку.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.recipients.iter().map(|r| r.address.as_ref())
    }

    /// Тот же запрос для подмножества получателей.
    pub fn subset(
        &self,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            message: self.message.clone(),
            recipients,
        }
    }
}

impl Outcome {
    pub fn is_transient(&self) -> bool {
        matches!(self, Outcome::TransientFailure(_))
    }
}

impl Response {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self { outcomes }
    }

    /// Одинаковый итог для `count` получателей.
    pub fn uniform(
        count: usize,
        outcome: Outcome,
    ) -> Self {
        Self {
            outcomes: vec![outcome; count],
        }
    }

    pub fn delivered(count: usize) -> Self {
        Self::uniform(count, Outcome::Delivered)
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o, Outcome::Delivered | Outcome::CanonicalIdChanged(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::pubsub::{LocalSink, Path, Pattern, Sink, SubscriptionRegistry};

    fn msg() -> Message {
        Message::new(Path::parse("/p").unwrap(), Bytes::new())
    }

    /// Тест проверяет, что групповой запрос берёт только получателей
    /// коннектора.
    #[test]
    fn test_multicast_skips_local_sinks() {
        let reg = SubscriptionRegistry::new();
        let (sink, _rx) = LocalSink::channel(1);
        reg.subscribe(Pattern::parse("/p").unwrap(), Sink::Local(sink), None);
        let subs = reg.matching_sinks(&msg());

        let req = Request::multicast(msg(), &subs);
        assert!(req.recipients().is_empty());
    }

    /// Тест проверяет подсчёт неудач в ответе.
    #[test]
    fn test_response_failures() {
        let resp = Response::new(vec![
            Outcome::Delivered,
            Outcome::TransientFailure("Unavailable".into()),
            Outcome::PermanentFailure("NotRegistered".into()),
            Outcome::CanonicalIdChanged("new".into()),
        ]);
        assert_eq!(resp.failures(), 2);
        assert_eq!(Response::delivered(3).failures(), 0);
        assert!(resp.outcomes()[1].is_transient());
    }

    /// Тест проверяет одиночный запрос и подмножество получателей.
    #[test]
    fn test_single_and_subset() {
        let req = Request::single(msg(), Arc::from("tok"));
        assert_eq!(req.addresses().collect::<Vec<_>>(), vec!["tok"]);
        let empty = req.subset(Vec::new());
        assert!(empty.recipients().is_empty());
        assert_eq!(empty.message().path().as_str(), "/p");
    }
}
