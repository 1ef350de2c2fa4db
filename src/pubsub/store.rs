use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use volna_error::VolnaResult;

use super::{Message, Path};

/// Хранилище сообщений, к которому роутер передаёт локальные публикации.
pub trait MessageStore: Send + Sync {
    /// Добавляет сообщение, возвращает его смещение в журнале темы.
    fn append(
        &self,
        msg: &Message,
    ) -> VolnaResult<u64>;

    /// Ленивая конечная последовательность сообщений темы, начиная с
    /// смещения `from`. Повторный вызов с любым смещением начинает заново.
    fn fetch(
        &self,
        path: &Path,
        from: u64,
    ) -> Box<dyn Iterator<Item = (u64, Message)> + Send>;
}

/// Хранилище в памяти: отдельный журнал на каждую тему.
#[derive(Default)]
pub struct MemoryStore {
    topics: RwLock<HashMap<Path, Arc<RwLock<Vec<Message>>>>>,
}

/// Курсор по журналу темы; читает по одному сообщению.
struct Cursor {
    log: Arc<RwLock<Vec<Message>>>,
    next: u64,
    end: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Число сообщений в журнале темы.
    pub fn len(
        &self,
        path: &Path,
    ) -> usize {
        self.topics
            .read()
            .get(path)
            .map(|log| log.read().len())
            .unwrap_or(0)
    }
}

impl MessageStore for MemoryStore {
    fn append(
        &self,
        msg: &Message,
    ) -> VolnaResult<u64> {
        let log = {
            let mut topics = self.topics.write();
            topics.entry(msg.path().clone()).or_default().clone()
        };
        let mut log = log.write();
        log.push(msg.clone());
        Ok(log.len() as u64 - 1)
    }

    fn fetch(
        &self,
        path: &Path,
        from: u64,
    ) -> Box<dyn Iterator<Item = (u64, Message)> + Send> {
        let Some(log) = self.topics.read().get(path).cloned() else {
            return Box::new(std::iter::empty());
        };
        // Граница фиксируется при вызове: последовательность конечна.
        let end = log.read().len() as u64;
        Box::new(Cursor {
            log,
            next: from,
            end,
        })
    }
}

impl Iterator for Cursor {
    type Item = (u64, Message);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let offset = self.next;
        let msg = self.log.read().get(offset as usize).cloned()?;
        self.next += 1;
        Some((offset, msg))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(
        path: &str,
        body: &'static [u8],
    ) -> Message {
        Message::new(Path::parse(path).unwrap(), Bytes::from_static(body))
    }

    /// Тест проверяет смещения и чтение с произвольного смещения.
    #[test]
    fn test_append_and_fetch_from_offset() {
        let store = MemoryStore::new();
        assert_eq!(store.append(&msg("/a", b"0")).unwrap(), 0);
        assert_eq!(store.append(&msg("/a", b"1")).unwrap(), 1);
        assert_eq!(store.append(&msg("/b", b"x")).unwrap(), 0);
        assert_eq!(store.append(&msg("/a", b"2")).unwrap(), 2);

        let path = Path::parse("/a").unwrap();
        let all: Vec<u64> = store.fetch(&path, 0).map(|(o, _)| o).collect();
        assert_eq!(all, vec![0, 1, 2]);

        let tail: Vec<Bytes> = store
            .fetch(&path, 1)
            .map(|(_, m)| m.body().clone())
            .collect();
        assert_eq!(tail, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
        assert_eq!(store.len(&path), 3);
    }

    /// Тест проверяет, что последовательность конечна и не видит
    /// сообщений, добавленных после начала чтения.
    #[test]
    fn test_fetch_is_bounded_at_call_time() {
        let store = MemoryStore::new();
        store.append(&msg("/a", b"0")).unwrap();
        let path = Path::parse("/a").unwrap();
        let mut iter = store.fetch(&path, 0);
        store.append(&msg("/a", b"1")).unwrap();
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
    }

    /// Тест проверяет чтение неизвестной темы и смещения за концом.
    #[test]
    fn test_fetch_unknown_or_past_end() {
        let store = MemoryStore::new();
        let path = Path::parse("/none").unwrap();
        assert_eq!(store.fetch(&path, 0).count(), 0);
        store.append(&msg("/none", b"x")).unwrap();
        assert_eq!(store.fetch(&path, 5).count(), 0);
    }
}
