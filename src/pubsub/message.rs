use std::{fmt, sync::Arc};

use bytes::Bytes;

use super::Path;

/// Идентификатор узла кластера.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

/// Публикуемое сообщение.
///
/// Неизменяемо после создания: роутер выдаёт штампованную копию с
/// проставленными `id` и `origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    path: Path,
    body: Bytes,
    user_id: Option<Arc<str>>,
    origin: Option<NodeId>,
    id: Option<u64>,
    /// Время публикации, unix-миллисекунды
    timestamp: i64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Случайный идентификатор на основе UUID v4.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Message {
    /// Новое локальное сообщение без `id` и `origin`.
    pub fn new(
        path: Path,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            path,
            body: body.into(),
            user_id: None,
            origin: None,
            id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Сообщение, полученное от другого узла: все поля уже известны.
    pub fn remote(
        origin: NodeId,
        id: u64,
        timestamp: i64,
        path: Path,
        user_id: Option<Arc<str>>,
        body: Bytes,
    ) -> Self {
        Self {
            path,
            body,
            user_id,
            origin: Some(origin),
            id: Some(id),
            timestamp,
        }
    }

    pub fn with_user_id(
        mut self,
        user_id: impl AsRef<str>,
    ) -> Self {
        self.user_id = Some(Arc::from(user_id.as_ref()));
        self
    }

    /// Копия с проставленными `origin` и `id`; уже заданные поля сохраняются.
    pub(crate) fn stamped(
        &self,
        origin: &NodeId,
        next_id: impl FnOnce() -> u64,
    ) -> Self {
        let mut copy = self.clone();
        if copy.origin.is_none() {
            copy.origin = Some(origin.clone());
        }
        if copy.id.is_none() {
            copy.id = Some(next_id());
        }
        copy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn origin(&self) -> Option<&NodeId> {
        self.origin.as_ref()
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Ключ дедупликации `(origin, id)`, если сообщение уже проштамповано.
    pub fn dedup_key(&self) -> Option<(NodeId, u64)> {
        Some((self.origin.clone()?, self.id?))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для NodeId
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание локального сообщения без штампа.
    #[test]
    fn test_new_message_is_unstamped() {
        let msg = Message::new(Path::parse("/news").unwrap(), &b"hello"[..]);
        assert_eq!(msg.path().as_str(), "/news");
        assert_eq!(msg.body(), &Bytes::from_static(b"hello"));
        assert!(msg.origin().is_none());
        assert!(msg.id().is_none());
        assert!(msg.dedup_key().is_none());
        assert!(msg.timestamp() > 0);
    }

    /// Тест проверяет, что штамп не перезаписывает уже заданные поля.
    #[test]
    fn test_stamped_keeps_existing_fields() {
        let path = Path::parse("/a").unwrap();
        let local = NodeId::new("1");
        let remote = Message::remote(
            NodeId::new("2"),
            7,
            100,
            path.clone(),
            None,
            Bytes::new(),
        );
        let copy = remote.stamped(&local, || 99);
        assert_eq!(copy.origin().unwrap().as_str(), "2");
        assert_eq!(copy.id(), Some(7));

        let fresh = Message::new(path, Bytes::new()).with_user_id("u1");
        let copy = fresh.stamped(&local, || 99);
        assert_eq!(copy.origin(), Some(&local));
        assert_eq!(copy.id(), Some(99));
        assert_eq!(copy.user_id(), Some("u1"));
        assert!(fresh.id().is_none());
    }

    /// Тест проверяет, что случайные идентификаторы узлов различаются.
    #[test]
    fn test_random_node_ids_differ() {
        assert_ne!(NodeId::random(), NodeId::random());
    }
}
