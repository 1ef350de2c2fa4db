use std::{
    collections::{BTreeSet, HashMap},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{mpsc, watch},
};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use volna_error::{ClusterError, ResultExt, VolnaResult};

use super::{
    peer::{peer_task, LinkContext, LinkEvent},
    PeerCodec, PeerState, MAX_FRAME_SIZE,
};
use crate::{
    backoff::BackoffConfig,
    pubsub::{Message, NodeId, Router},
};

/// Ёмкость канала событий связей.
const LINK_EVENTS_CAPACITY: usize = 64;

/// Параметры синхронизатора.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Адрес для входящих соединений узлов; `None`: только исходящие
    pub listen: Option<String>,
    /// Адрес, сообщаемый в рукопожатии; по умолчанию фактический адрес
    /// слушателя
    pub advertised: Option<String>,
    /// Адреса узлов `host:port`
    pub peers: Vec<String>,
    /// Ёмкость очереди отправки каждой связи
    pub peer_queue: usize,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub backoff: BackoffConfig,
    pub max_frame: usize,
}

/// Счётчики кластера.
#[derive(Debug, Default)]
pub struct ClusterStats {
    pub(crate) links_up: AtomicU64,
    pub(crate) links_down: AtomicU64,
    pub(crate) disconnects: AtomicU64,
    pub(crate) connect_failures: AtomicU64,
    pub(crate) handshake_failures: AtomicU64,
    pub(crate) sent: AtomicU64,
    pub(crate) received: AtomicU64,
    pub(crate) forwarded: AtomicU64,
    pub(crate) peer_dropped: AtomicU64,
    pub(crate) inbound_accepted: AtomicU64,
}

/// Снимок счётчиков кластера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStatsSnapshot {
    pub links_up: u64,
    pub links_down: u64,
    pub disconnects: u64,
    pub connect_failures: u64,
    pub handshake_failures: u64,
    /// Кадров `MESSAGE`, записанных в сокеты
    pub sent: u64,
    /// Кадров `MESSAGE`, принятых от узлов
    pub received: u64,
    /// Сообщений, поставленных в очереди связей
    pub forwarded: u64,
    /// Сообщений, отброшенных из-за полной очереди связи
    pub peer_dropped: u64,
    pub inbound_accepted: u64,
}

/// Синхронизатор кластера.
///
/// Держит исходящие связи к настроенным узлам и принимает входящие.
/// Каждое локальное сообщение из очереди репликации отправляется всем
/// подключённым узлам, по одной связи на узел. Сообщения от узлов идут в
/// [`Router::deliver_remote`] и дальше не пересылаются.
pub struct ClusterSynchronizer {
    ctx: Arc<LinkContext>,
    tracker: TaskTracker,
    local_addr: Option<SocketAddr>,
    peers: Mutex<Vec<(String, watch::Receiver<PeerState>)>>,
    connected: watch::Receiver<BTreeSet<NodeId>>,
}

/// Связи одного удалённого узла; пересылка идёт через первую.
type LinkTable = HashMap<NodeId, Vec<(u64, mpsc::Sender<Message>)>>;

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            listen: None,
            advertised: None,
            peers: Vec::new(),
            peer_queue: 1024,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
            max_frame: MAX_FRAME_SIZE,
        }
    }
}

impl ClusterStats {
    pub fn snapshot(&self) -> ClusterStatsSnapshot {
        ClusterStatsSnapshot {
            links_up: self.links_up.load(Ordering::Relaxed),
            links_down: self.links_down.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            peer_dropped: self.peer_dropped.load(Ordering::Relaxed),
            inbound_accepted: self.inbound_accepted.load(Ordering::Relaxed),
        }
    }
}

impl ClusterSynchronizer {
    /// Запускает слушатель, задачи узлов и задачу рассылки.
    ///
    /// `replication`: приёмная сторона [`crate::pubsub::Replicator`]
    /// роутера.
    pub async fn start(
        config: ClusterConfig,
        router: Arc<Router>,
        replication: mpsc::Receiver<Message>,
    ) -> VolnaResult<Self> {
        let listener = match &config.listen {
            Some(address) => Some(TcpListener::bind(address).await.map_err(|e| {
                ClusterError::Bind {
                    address: address.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        let local_addr = match &listener {
            Some(listener) => Some(
                listener
                    .local_addr()
                    .context("Failed to read cluster listener address")?,
            ),
            None => None,
        };
        let advertised = config
            .advertised
            .clone()
            .or_else(|| local_addr.map(|a| a.to_string()))
            .unwrap_or_default();

        let local = router.node_id().clone();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let stats = Arc::new(ClusterStats::default());
        let (events_tx, events_rx) = mpsc::channel(LINK_EVENTS_CAPACITY);
        let (connected_tx, connected) = watch::channel(BTreeSet::new());

        let peers = config.peers.clone();
        let ctx = Arc::new(LinkContext::new(
            local.clone(),
            advertised,
            config,
            router,
            events_tx,
            cancel.clone(),
            stats,
        ));

        tracker.spawn(fan_out_task(
            ctx.clone(),
            events_rx,
            replication,
            connected_tx,
        ));
        if let Some(listener) = listener {
            tracker.spawn(accept_loop(ctx.clone(), listener, tracker.clone()));
        }

        info!(
            node_id = %local,
            listen = ?local_addr,
            peers = peers.len(),
            "Cluster synchronizer started"
        );

        let sync = Self {
            ctx,
            tracker,
            local_addr,
            peers: Mutex::new(Vec::new()),
            connected,
        };
        for peer in peers {
            sync.add_peer(peer);
        }
        Ok(sync)
    }

    /// Добавляет узел и запускает для него задачу соединения.
    pub fn add_peer(
        &self,
        peer: impl Into<String>,
    ) -> watch::Receiver<PeerState> {
        let peer = peer.into();
        let (state_tx, state_rx) = watch::channel(PeerState::Disconnected);
        self.peers.lock().push((peer.clone(), state_rx.clone()));
        self.tracker
            .spawn(peer_task(self.ctx.clone(), peer, state_tx));
        state_rx
    }

    pub fn node_id(&self) -> &NodeId {
        &self.ctx.local
    }

    /// Фактический адрес слушателя (полезно при привязке к порту 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_states(&self) -> Vec<(String, PeerState)> {
        self.peers
            .lock()
            .iter()
            .map(|(addr, rx)| (addr.clone(), rx.borrow().clone()))
            .collect()
    }

    pub fn peer_state(
        &self,
        peer: &str,
    ) -> Option<PeerState> {
        self.peers
            .lock()
            .iter()
            .find(|(addr, _)| addr == peer)
            .map(|(_, rx)| rx.borrow().clone())
    }

    /// Узлы, с которыми сейчас есть связь (входящая или исходящая).
    pub fn connected_nodes(&self) -> BTreeSet<NodeId> {
        self.connected.borrow().clone()
    }

    /// Ждёт появления связи с узлом не дольше `limit`.
    pub async fn wait_connected(
        &self,
        node: &NodeId,
        limit: Duration,
    ) -> bool {
        let mut rx = self.connected.clone();
        let connected = matches!(
            tokio::time::timeout(limit, rx.wait_for(|nodes| nodes.contains(node))).await,
            Ok(Ok(_))
        );
        connected
    }

    pub fn stats(&self) -> ClusterStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Отменяет все связи, слушатель и рассылку; ждёт завершения задач.
    pub async fn shutdown(&self) {
        self.ctx.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(node_id = %self.ctx.local, "Cluster synchronizer stopped");
    }
}

/// Единственный владелец таблицы связей: регистрирует связи по событиям
/// и раздаёт сообщения репликации.
async fn fan_out_task(
    ctx: Arc<LinkContext>,
    mut events: mpsc::Receiver<LinkEvent>,
    mut replication: mpsc::Receiver<Message>,
    connected: watch::Sender<BTreeSet<NodeId>>,
) {
    let mut links: LinkTable = HashMap::new();

    loop {
        select! {
            _ = ctx.cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                apply_event(&mut links, event);
                connected.send_replace(links.keys().cloned().collect());
            }
            msg = replication.recv() => {
                let Some(msg) = msg else { break };
                forward(&ctx, &links, msg);
            }
        }
    }
    debug!(node_id = %ctx.local, "Cluster fan-out stopped");
}

fn apply_event(
    links: &mut LinkTable,
    event: LinkEvent,
) {
    match event {
        LinkEvent::Up { node, link, tx } => {
            links.entry(node).or_default().push((link, tx));
        }
        LinkEvent::Down { node, link } => {
            if let Some(list) = links.get_mut(&node) {
                list.retain(|(id, _)| *id != link);
                if list.is_empty() {
                    links.remove(&node);
                }
            }
        }
    }
}

/// Отправляет сообщение каждому узлу по его первой связи.
fn forward(
    ctx: &LinkContext,
    links: &LinkTable,
    msg: Message,
) {
    for (node, list) in links {
        let Some((_, tx)) = list.first() else {
            continue;
        };
        match tx.try_send(msg.clone()) {
            Ok(()) => {
                ctx.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                ctx.stats.peer_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(remote = %node, path = %msg.path(), "Peer queue full, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(remote = %node, "Peer link closing, message skipped");
            }
        }
    }
}

async fn accept_loop(
    ctx: Arc<LinkContext>,
    listener: TcpListener,
    tracker: TaskTracker,
) {
    loop {
        let (stream, addr) = select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Failed to accept peer connection");
                    continue;
                }
            },
        };
        ctx.stats.inbound_accepted.fetch_add(1, Ordering::Relaxed);
        tracker.spawn(handle_inbound(ctx.clone(), stream, addr));
    }
}

async fn handle_inbound(
    ctx: Arc<LinkContext>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let _ = stream.set_nodelay(true);
    let peer = addr.to_string();
    let mut framed = Framed::new(stream, PeerCodec::new(ctx.config.max_frame));

    match ctx.handshake(&mut framed, &peer).await {
        Ok(remote) => ctx.run_link(framed, remote, &peer).await,
        Err(ClusterError::SelfConnection { .. }) => {
            debug!(peer = %peer, "Inbound connection from this node closed");
        }
        Err(err) => {
            ctx.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            warn!(peer = %peer, error = %err, "Inbound handshake failed");
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
