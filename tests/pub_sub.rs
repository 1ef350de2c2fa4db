use std::sync::Arc;

use bytes::Bytes;
use volna::{
    pubsub::{MemoryStore, MessageStore, RouterConfig},
    LocalSink, Message, NodeId, Path, Pattern, Router, Sink, SubscriptionRegistry, TransportPort,
    TryRecvError,
};

mod testutil;
use testutil::{expect_done, msg};

fn router(node: &str) -> Router {
    Router::new(
        RouterConfig {
            node_id: NodeId::new(node),
            max_message_size: 1024,
            dedup_window: 64,
        },
        Arc::new(SubscriptionRegistry::new()),
    )
}

/// Тест проверяет, что `/topic/a` получает только подписчик `/topic/*`,
/// но не `/topic/a/b`.
#[tokio::test]
async fn test_single_wildcard_vs_longer_pattern() {
    let router = router("n1");
    let (wild, mut wild_rx) = LocalSink::channel(8);
    let (deep, mut deep_rx) = LocalSink::channel(8);
    router
        .on_subscribe("/topic/*", Sink::Local(wild), None)
        .unwrap();
    router
        .on_subscribe("/topic/a/b", Sink::Local(deep), None)
        .unwrap();

    router.publish(msg("/topic/a", b"x")).unwrap();

    let got = expect_done("wildcard subscriber", wild_rx.recv()).await.unwrap();
    assert_eq!(got.path().as_str(), "/topic/a");
    assert_eq!(got.body(), &Bytes::from_static(b"x"));
    assert!(matches!(deep_rx.try_recv(), Err(TryRecvError::Empty)));
}

/// Тест проверяет доставку одному приёмнику по нескольким подходящим
/// подпискам: по одной копии на подписку.
#[tokio::test]
async fn test_overlapping_patterns_same_sink() {
    let router = router("n1");
    let (sink, mut rx) = LocalSink::channel(8);
    router
        .on_subscribe("/a/**", Sink::Local(sink.clone()), None)
        .unwrap();
    router
        .on_subscribe("/a/b", Sink::Local(sink), None)
        .unwrap();

    router.publish(msg("/a/b", b"1")).unwrap();
    expect_done("first copy", rx.recv()).await.unwrap();
    expect_done("second copy", rx.recv()).await.unwrap();
    assert!(rx.try_recv().is_err());
}

/// Тест проверяет фильтр по пользователю.
#[tokio::test]
async fn test_user_filter() {
    let router = router("n1");
    let (sink, mut rx) = LocalSink::channel(8);
    router
        .on_subscribe("/user/inbox", Sink::Local(sink), Some("alice"))
        .unwrap();

    router
        .publish(msg("/user/inbox", b"for bob").with_user_id("bob"))
        .unwrap();
    router
        .publish(msg("/user/inbox", b"for alice").with_user_id("alice"))
        .unwrap();

    let got = expect_done("filtered message", rx.recv()).await.unwrap();
    assert_eq!(got.user_id(), Some("alice"));
    assert_eq!(got.body(), &Bytes::from_static(b"for alice"));
    assert!(rx.try_recv().is_err());
}

/// Тест проверяет, что после отписки сообщения не доставляются, а закрытый
/// приёмник удаляется из реестра.
#[tokio::test]
async fn test_unsubscribe_and_closed_sink() {
    let router = router("n1");
    let (sink, mut rx) = LocalSink::channel(8);
    let handle = router
        .on_subscribe("/news", Sink::Local(sink), None)
        .unwrap();
    router.on_unsubscribe(handle).unwrap();
    assert!(router.on_unsubscribe(handle).is_err());

    router.publish(msg("/news", b"late")).unwrap();
    assert!(rx.try_recv().is_err());

    let (sink, rx) = LocalSink::channel(8);
    router
        .on_subscribe("/news", Sink::Local(sink), None)
        .unwrap();
    drop(rx);
    router.publish(msg("/news", b"gone")).unwrap();
    assert!(router.registry().is_empty());
    assert_eq!(router.stats().sinks_closed, 1);
}

/// Тест проверяет, что переполненный приёмник теряет новое сообщение и не
/// мешает остальным.
#[tokio::test]
async fn test_full_sink_drops_newest() {
    let router = router("n1");
    let (slow, mut slow_rx) = LocalSink::channel(1);
    let (fast, mut fast_rx) = LocalSink::channel(8);
    router.on_subscribe("/q", Sink::Local(slow), None).unwrap();
    router.on_subscribe("/q", Sink::Local(fast), None).unwrap();

    router.publish(msg("/q", b"1")).unwrap();
    router.publish(msg("/q", b"2")).unwrap();

    assert_eq!(slow_rx.recv().await.unwrap().body(), &Bytes::from_static(b"1"));
    assert!(slow_rx.try_recv().is_err());
    assert_eq!(fast_rx.recv().await.unwrap().body(), &Bytes::from_static(b"1"));
    assert_eq!(fast_rx.recv().await.unwrap().body(), &Bytes::from_static(b"2"));
    assert_eq!(router.stats().dropped, 1);
}

/// Тест проверяет отказ для некорректного шаблона и слишком большого
/// сообщения.
#[tokio::test]
async fn test_rejections() {
    let router = router("n1");
    let (sink, _rx) = LocalSink::channel(1);
    assert!(router
        .on_subscribe("/a/**/b", Sink::Local(sink), None)
        .is_err());

    let big = Message::new(Path::parse("/big").unwrap(), vec![0u8; 2048]);
    assert!(router.publish(big).is_err());
}

/// Тест проверяет, что сообщение от другого узла доставляется один раз.
#[tokio::test]
async fn test_remote_delivery_dedup() {
    let router = router("n2");
    let (sink, mut rx) = LocalSink::channel(8);
    router.on_subscribe("/foo", Sink::Local(sink), None).unwrap();

    let remote = Message::remote(
        NodeId::new("n1"),
        7,
        0,
        Path::parse("/foo").unwrap(),
        None,
        Bytes::from_static(b"r"),
    );
    assert!(router.deliver_remote(remote.clone()).unwrap());
    assert!(!router.deliver_remote(remote).unwrap());

    let got = expect_done("remote message", rx.recv()).await.unwrap();
    assert_eq!(got.origin(), Some(&NodeId::new("n1")));
    assert!(rx.try_recv().is_err());
    assert_eq!(router.stats().duplicates, 1);
}

/// Тест проверяет чтение сохранённых публикаций по смещению.
#[tokio::test]
async fn test_store_fetch_after_publish() {
    let store = Arc::new(MemoryStore::new());
    let router = router("n1").with_store(store.clone());
    for body in [b"a", b"b", b"c"] {
        router.publish(msg("/log", body)).unwrap();
    }

    let path = Path::parse("/log").unwrap();
    let tail: Vec<_> = store.fetch(&path, 1).map(|(_, m)| m.body().clone()).collect();
    assert_eq!(tail, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
}

/// Тест проверяет сопоставление через публичную функцию.
#[test]
fn test_matches_helper() {
    let pattern = Pattern::parse("/devices/*/status").unwrap();
    assert!(volna::matches(&pattern, &Path::parse("/devices/42/status").unwrap()));
    assert!(!volna::matches(&pattern, &Path::parse("/devices/42").unwrap()));
}
