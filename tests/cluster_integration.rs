use std::time::Duration;

use bytes::Bytes;
use volna::{BrokerNode, NodeId, Settings, TryRecvError};

mod testutil;
use testutil::{expect_done, msg};

fn node_settings(id: &str) -> Settings {
    let mut settings = Settings::default();
    settings.node.id = Some(id.to_string());
    settings.cluster.listen = Some("127.0.0.1:0".to_string());
    settings.cluster.connect_timeout_ms = 500;
    settings.cluster.handshake_timeout_ms = 500;
    settings.cluster.backoff_base_ms = 20;
    settings.cluster.backoff_max_ms = 200;
    settings
}

/// Тест проверяет пересылку между двумя узлами: подписчик второго узла
/// получает сообщение с `origin` первого, а второй узел ничего не
/// пересылает обратно.
#[tokio::test]
async fn test_two_node_cluster() {
    let node1 = BrokerNode::start(node_settings("1")).await.unwrap();
    let addr1 = node1.cluster().unwrap().local_addr().unwrap();

    let mut settings2 = node_settings("2");
    settings2.cluster.peers = vec![addr1.to_string()];
    let node2 = BrokerNode::start(settings2).await.unwrap();

    let id1 = NodeId::new("1");
    let id2 = NodeId::new("2");
    assert!(
        node2
            .cluster()
            .unwrap()
            .wait_connected(&id1, Duration::from_secs(5))
            .await
    );
    assert!(
        node1
            .cluster()
            .unwrap()
            .wait_connected(&id2, Duration::from_secs(5))
            .await
    );

    let (_h1, mut rx1) = node1.subscribe_local("/testTopic", None).unwrap();
    let (_h2, mut rx2) = node2.subscribe_local("/foo", None).unwrap();

    node1
        .publish(msg("/foo", b"xyz").with_user_id("user1"))
        .unwrap();

    let got = expect_done("message on node 2", rx2.recv()).await.unwrap();
    assert_eq!(got.path().as_str(), "/foo");
    assert_eq!(got.origin(), Some(&id1));
    assert_eq!(got.user_id(), Some("user1"));
    assert_eq!(got.body(), &Bytes::from_static(b"xyz"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));

    let stats1 = node1.router().stats();
    let stats2 = node2.router().stats();
    assert_eq!(stats1.replicated, 1);
    assert_eq!(stats1.remote_received, 0);
    assert_eq!(stats2.remote_received, 1);
    assert_eq!(stats2.replicated, 0);

    node2.shutdown().await;
    node1.shutdown().await;
}

/// Тест проверяет обратное направление через входящую связь: сообщение
/// второго узла доходит до подписчика первого.
#[tokio::test]
async fn test_inbound_link_forwards() {
    let node1 = BrokerNode::start(node_settings("a")).await.unwrap();
    let addr1 = node1.cluster().unwrap().local_addr().unwrap();
    let mut settings2 = node_settings("b");
    settings2.cluster.peers = vec![addr1.to_string()];
    let node2 = BrokerNode::start(settings2).await.unwrap();

    assert!(
        node1
            .cluster()
            .unwrap()
            .wait_connected(&NodeId::new("b"), Duration::from_secs(5))
            .await
    );
    let (_h, mut rx1) = node1.subscribe_local("/events/**", None).unwrap();
    node2.publish(msg("/events/x/y", b"up")).unwrap();

    let got = expect_done("message on node 1", rx1.recv()).await.unwrap();
    assert_eq!(got.origin(), Some(&NodeId::new("b")));

    node2.shutdown().await;
    node1.shutdown().await;
}

/// Тест проверяет, что узел, указанный сам себе как соседний, бросает
/// связь после рукопожатия.
#[tokio::test]
async fn test_self_peer_abandoned() {
    let node = BrokerNode::start(node_settings("solo")).await.unwrap();
    let cluster = node.cluster().unwrap();
    let addr = cluster.local_addr().unwrap();

    let mut state = cluster.add_peer(addr.to_string());
    expect_done("peer task exit", async {
        while state.changed().await.is_ok() {}
    })
    .await;

    assert!(cluster.connected_nodes().is_empty());
    assert!(!state.borrow().is_connected());
    node.shutdown().await;
}

/// Тест проверяет, что сообщения, опубликованные без связи, не ломают узел.
#[tokio::test]
async fn test_publish_without_peers() {
    let node = BrokerNode::start(node_settings("alone")).await.unwrap();
    node.publish(msg("/lonely", b"x")).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(node.cluster().unwrap().stats().sent, 0);
    node.shutdown().await;
}
