use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{Message, Pattern, Segment, Sink, SinkId};

/// Дескриптор подписки. Монотонно растёт и задаёт порядок вставки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

/// Подписка: шаблон, приёмник и необязательный фильтр по пользователю.
#[derive(Debug, Clone)]
pub struct Subscription {
    handle: SubscriptionHandle,
    pattern: Pattern,
    sink: Sink,
    user_filter: Option<Arc<str>>,
}

/// Реестр подписок.
///
/// Дерево по сегментам шаблона под `RwLock`: поиск идёт параллельно,
/// изменения сериализуются. Пара `(шаблон, приёмник)` уникальна.
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
    next_handle: AtomicU64,
}

#[derive(Default)]
struct Inner {
    root: TreeNode,
    entries: HashMap<SubscriptionHandle, Arc<Subscription>>,
    by_key: HashMap<(Pattern, SinkId), SubscriptionHandle>,
    by_sink: HashMap<SinkId, BTreeSet<SubscriptionHandle>>,
}

/// Узел дерева: буквальные потомки, потомок `*`, корзина `**` и
/// подписки, оканчивающиеся на этом узле.
#[derive(Default)]
struct TreeNode {
    literal: HashMap<Arc<str>, TreeNode>,
    single: Option<Box<TreeNode>>,
    multi: BTreeSet<SubscriptionHandle>,
    terminal: BTreeSet<SubscriptionHandle>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn sink_id(&self) -> SinkId {
        self.sink.id()
    }

    pub fn user_filter(&self) -> Option<&str> {
        self.user_filter.as_deref()
    }

    /// Проверяет шаблон и фильтр по пользователю.
    pub fn accepts(
        &self,
        msg: &Message,
    ) -> bool {
        if let Some(filter) = &self.user_filter {
            if msg.user_id() != Some(filter.as_ref()) {
                return false;
            }
        }
        self.pattern.matches(msg.path())
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Регистрирует подписку.
    ///
    /// Повторная регистрация той же пары `(шаблон, приёмник)` возвращает
    /// существующий дескриптор.
    pub fn subscribe(
        &self,
        pattern: Pattern,
        sink: Sink,
        user_filter: Option<&str>,
    ) -> SubscriptionHandle {
        let sink_id = sink.id();
        let key = (pattern.clone(), sink_id.clone());

        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_key.get(&key) {
            trace!(pattern = %pattern, sink = %sink_id, handle = existing.0, "Duplicate subscription");
            return *existing;
        }

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        inner.root.insert(pattern.segments(), handle);
        inner.by_key.insert(key, handle);
        inner.by_sink.entry(sink_id.clone()).or_default().insert(handle);
        inner.entries.insert(
            handle,
            Arc::new(Subscription {
                handle,
                pattern: pattern.clone(),
                sink,
                user_filter: user_filter.map(Arc::from),
            }),
        );

        debug!(pattern = %pattern, sink = %sink_id, handle = handle.0, "Subscription added");
        handle
    }

    /// Удаляет подписку. После возврата дескриптор не встречается в
    /// результатах [`Self::matching_sinks`].
    pub fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Option<Arc<Subscription>> {
        let mut inner = self.inner.write();
        let removed = inner.remove(handle)?;
        debug!(pattern = %removed.pattern, handle = handle.0, "Subscription removed");
        Some(removed)
    }

    /// Удаляет все подписки приёмника. Возвращает число удалённых.
    pub fn unsubscribe_sink(
        &self,
        sink_id: &SinkId,
    ) -> usize {
        let mut inner = self.inner.write();
        let handles: Vec<_> = inner
            .by_sink
            .get(sink_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for handle in &handles {
            inner.remove(*handle);
        }
        if !handles.is_empty() {
            debug!(sink = %sink_id, count = handles.len(), "Sink subscriptions removed");
        }
        handles.len()
    }

    /// Атомарно меняет приёмник подписки, сохраняя шаблон, фильтр и
    /// дескриптор.
    ///
    /// Если пара `(шаблон, новый приёмник)` уже зарегистрирована, старая
    /// подписка просто удаляется и возвращается существующий дескриптор.
    pub fn replace_sink(
        &self,
        handle: SubscriptionHandle,
        new_sink: Sink,
    ) -> Option<SubscriptionHandle> {
        let mut inner = self.inner.write();
        let old = inner.entries.get(&handle)?.clone();
        let new_id = new_sink.id();
        let new_key = (old.pattern.clone(), new_id.clone());

        if let Some(existing) = inner.by_key.get(&new_key).copied() {
            if existing != handle {
                inner.remove(handle);
            }
            debug!(handle = handle.0, into = existing.0, "Subscription merged on sink replace");
            return Some(existing);
        }

        let old_id = old.sink.id();
        inner.by_key.remove(&(old.pattern.clone(), old_id.clone()));
        inner.detach_sink(&old_id, handle);
        inner.by_key.insert(new_key, handle);
        inner.by_sink.entry(new_id.clone()).or_default().insert(handle);
        inner.entries.insert(
            handle,
            Arc::new(Subscription {
                handle,
                pattern: old.pattern.clone(),
                sink: new_sink,
                user_filter: old.user_filter.clone(),
            }),
        );

        debug!(handle = handle.0, from = %old_id, to = %new_id, "Subscription sink replaced");
        Some(handle)
    }

    /// Снимок подписок, подходящих под сообщение, в порядке вставки.
    pub fn matching_sinks(
        &self,
        msg: &Message,
    ) -> Vec<Arc<Subscription>> {
        let inner = self.inner.read();
        let mut handles = BTreeSet::new();
        inner
            .root
            .collect(msg.path().segments(), 0, &mut handles);

        handles
            .into_iter()
            .filter_map(|h| inner.entries.get(&h))
            .filter(|sub| match &sub.user_filter {
                Some(filter) => msg.user_id() == Some(filter.as_ref()),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn get(
        &self,
        handle: SubscriptionHandle,
    ) -> Option<Arc<Subscription>> {
        self.inner.read().entries.get(&handle).cloned()
    }

    /// Дескрипторы подписок приёмника.
    pub fn handles_for(
        &self,
        sink_id: &SinkId,
    ) -> Vec<SubscriptionHandle> {
        self.inner
            .read()
            .by_sink
            .get(sink_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn remove(
        &mut self,
        handle: SubscriptionHandle,
    ) -> Option<Arc<Subscription>> {
        let sub = self.entries.remove(&handle)?;
        let sink_id = sub.sink.id();
        self.by_key.remove(&(sub.pattern.clone(), sink_id.clone()));
        self.detach_sink(&sink_id, handle);
        self.root.remove(sub.pattern.segments(), handle);
        Some(sub)
    }

    fn detach_sink(
        &mut self,
        sink_id: &SinkId,
        handle: SubscriptionHandle,
    ) {
        if let Some(set) = self.by_sink.get_mut(sink_id) {
            set.remove(&handle);
            if set.is_empty() {
                self.by_sink.remove(sink_id);
            }
        }
    }
}

impl TreeNode {
    fn insert(
        &mut self,
        segments: &[Segment],
        handle: SubscriptionHandle,
    ) {
        match segments.split_first() {
            None => {
                self.terminal.insert(handle);
            }
            Some((Segment::Multi, _)) => {
                self.multi.insert(handle);
            }
            Some((Segment::Single, rest)) => self
                .single
                .get_or_insert_with(Default::default)
                .insert(rest, handle),
            Some((Segment::Literal(lit), rest)) => self
                .literal
                .entry(lit.clone())
                .or_default()
                .insert(rest, handle),
        }
    }

    /// Удаляет дескриптор и подрезает опустевшие ветви.
    fn remove(
        &mut self,
        segments: &[Segment],
        handle: SubscriptionHandle,
    ) {
        match segments.split_first() {
            None => {
                self.terminal.remove(&handle);
            }
            Some((Segment::Multi, _)) => {
                self.multi.remove(&handle);
            }
            Some((Segment::Single, rest)) => {
                if let Some(child) = self.single.as_mut() {
                    child.remove(rest, handle);
                    if child.is_empty() {
                        self.single = None;
                    }
                }
            }
            Some((Segment::Literal(lit), rest)) => {
                if let Some(child) = self.literal.get_mut(lit) {
                    child.remove(rest, handle);
                    if child.is_empty() {
                        self.literal.remove(lit);
                    }
                }
            }
        }
    }

    fn collect(
        &self,
        topic: &[Arc<str>],
        depth: usize,
        out: &mut BTreeSet<SubscriptionHandle>,
    ) {
        out.extend(self.multi.iter().copied());
        let Some(part) = topic.get(depth) else {
            out.extend(self.terminal.iter().copied());
            return;
        };
        if let Some(child) = self.literal.get(part) {
            child.collect(topic, depth + 1, out);
        }
        if let Some(child) = &self.single {
            child.collect(topic, depth + 1, out);
        }
    }

    fn is_empty(&self) -> bool {
        self.literal.is_empty()
            && self.single.is_none()
            && self.multi.is_empty()
            && self.terminal.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
