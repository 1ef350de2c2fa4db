//! Узел брокера: реестр, роутер, коннекторы и синхронизатор кластера,
//! собранные из [`Settings`].

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::info;
use volna_error::{bail, ConnectorError, PublishError, ResultExt, SubscribeError, VolnaResult};

use crate::{
    cluster::ClusterSynchronizer,
    config::Settings,
    connector::{Connector, ConnectorConfig, Sender},
    pubsub::{
        LocalReceiver, LocalSink, Message, MessageStore, NodeId, Replicator, Router, Sink,
        SubscriptionHandle, SubscriptionRegistry, TransportPort,
    },
};

/// Запущенный узел брокера.
pub struct BrokerNode {
    settings: Settings,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<Router>,
    cluster: Option<ClusterSynchronizer>,
    connectors: DashMap<String, Arc<Connector>>,
}

impl BrokerNode {
    /// Запускает узел. Синхронизатор поднимается, только если задан
    /// слушатель или список узлов.
    pub async fn start(settings: Settings) -> VolnaResult<Self> {
        Self::start_with_store(settings, None).await
    }

    /// То же, что [`BrokerNode::start`], с хранилищем локальных публикаций.
    pub async fn start_with_store(
        settings: Settings,
        store: Option<Arc<dyn MessageStore>>,
    ) -> VolnaResult<Self> {
        let node_id = settings.node_id();
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut router = Router::new(settings.router_config(node_id.clone()), registry.clone());
        if let Some(store) = store {
            router = router.with_store(store);
        }

        let (router, cluster) = if settings.cluster_enabled() {
            let (replicator, replication) = Replicator::channel(settings.cluster.replication_queue);
            let router = Arc::new(router.with_replicator(replicator));
            let cluster =
                ClusterSynchronizer::start(settings.cluster_config(), router.clone(), replication)
                    .await
                    .context("Failed to start cluster synchronizer")?;
            (router, Some(cluster))
        } else {
            (Arc::new(router), None)
        };

        info!(
            node_id = %node_id,
            cluster = cluster.is_some(),
            listen = ?cluster.as_ref().and_then(|c| c.local_addr()),
            "Broker node started"
        );

        Ok(Self {
            settings,
            registry,
            router,
            cluster,
            connectors: DashMap::new(),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        self.router.node_id()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn cluster(&self) -> Option<&ClusterSynchronizer> {
        self.cluster.as_ref()
    }

    /// Запускает коннектор с отправителем провайдера.
    pub fn register_connector<S: Sender>(
        &self,
        config: ConnectorConfig,
        sender: S,
    ) -> VolnaResult<Arc<Connector>> {
        match self.connectors.entry(config.name.clone()) {
            Entry::Occupied(entry) => bail!(ConnectorError::AlreadyRegistered {
                connector: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let connector = Arc::new(Connector::start(config, sender, self.registry.clone()));
                entry.insert(connector.clone());
                Ok(connector)
            }
        }
    }

    /// Запускает коннектор, описанный в секции `connectors` настроек.
    pub fn register_configured<S: Sender>(
        &self,
        name: &str,
        sender: S,
    ) -> VolnaResult<Arc<Connector>> {
        let Some(settings) = self.settings.connectors.iter().find(|c| c.name == name) else {
            bail!(SubscribeError::UnknownConnector {
                name: name.to_string(),
            });
        };
        self.register_connector(settings.to_config(), sender)
            .with_context(|| format!("Failed to register connector '{name}'"))
    }

    pub fn connector(
        &self,
        name: &str,
    ) -> Option<Arc<Connector>> {
        self.connectors.get(name).map(|c| c.value().clone())
    }

    /// Подписка с локальной очередью ёмкостью `node.sink_capacity`.
    pub fn subscribe_local(
        &self,
        pattern: &str,
        user_filter: Option<&str>,
    ) -> Result<(SubscriptionHandle, LocalReceiver), SubscribeError> {
        let (sink, receiver) = LocalSink::channel(self.settings.node.sink_capacity);
        let handle = self
            .router
            .on_subscribe(pattern, Sink::Local(sink), user_filter)?;
        Ok((handle, receiver))
    }

    /// Подписка получателя зарегистрированного коннектора.
    pub fn subscribe_connector(
        &self,
        pattern: &str,
        connector: &str,
        recipient: &str,
        user_filter: Option<&str>,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        let sink = self
            .connector(connector)
            .map(|c| c.sink(recipient))
            .ok_or_else(|| SubscribeError::UnknownConnector {
                name: connector.to_string(),
            })?;
        self.router.on_subscribe(pattern, sink, user_filter)
    }

    pub fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<(), SubscribeError> {
        self.router.on_unsubscribe(handle)
    }

    pub fn publish(
        &self,
        msg: Message,
    ) -> Result<Message, PublishError> {
        self.router.on_message(msg)
    }

    /// Останавливает синхронизатор, затем коннекторы по их политике.
    pub async fn shutdown(&self) {
        if let Some(cluster) = &self.cluster {
            cluster.shutdown().await;
        }

        let connectors: Vec<Arc<Connector>> =
            self.connectors.iter().map(|c| c.value().clone()).collect();
        futures::future::join_all(connectors.iter().map(|c| c.shutdown())).await;

        info!(node_id = %self.node_id(), "Broker node stopped");
    }
}
