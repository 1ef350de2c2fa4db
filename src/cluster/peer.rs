use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, watch},
    time::timeout,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, error, info, warn};
use volna_error::ClusterError;

use super::{ClusterConfig, ClusterStats, Frame, PeerCodec};
use crate::{
    backoff::ExponentialBackoff,
    pubsub::{Message, NodeId, Router},
};

/// Состояние связи с настроенным узлом.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    Disconnected,
    Connecting,
    /// Рукопожатие пройдено; известен идентификатор удалённого узла
    Connected(NodeId),
}

/// Событие жизненного цикла связи для задачи рассылки.
pub(crate) enum LinkEvent {
    Up {
        node: NodeId,
        link: u64,
        tx: mpsc::Sender<Message>,
    },
    Down {
        node: NodeId,
        link: u64,
    },
}

/// Общий контекст всех связей узла.
pub(crate) struct LinkContext {
    pub(crate) local: NodeId,
    pub(crate) advertised: String,
    pub(crate) config: ClusterConfig,
    pub(crate) router: Arc<Router>,
    pub(crate) events: mpsc::Sender<LinkEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<ClusterStats>,
    next_link: AtomicU64,
}

/// Итог попытки соединения с узлом.
enum Attempt {
    /// Связь установлена и позже разорвана
    Closed,
    /// Соединение или рукопожатие не удалось
    Failed(ClusterError),
    /// Узел оказался нами самими
    SelfConnection,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PeerState {
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected(_))
    }
}

impl LinkContext {
    pub(crate) fn new(
        local: NodeId,
        advertised: String,
        config: ClusterConfig,
        router: Arc<Router>,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
        stats: Arc<ClusterStats>,
    ) -> Self {
        Self {
            local,
            advertised,
            config,
            router,
            events,
            cancel,
            stats,
            next_link: AtomicU64::new(1),
        }
    }

    fn next_link_id(&self) -> u64 {
        self.next_link.fetch_add(1, Ordering::Relaxed)
    }

    /// Обмен `HELLO`: отправляет свой, ждёт чужой.
    ///
    /// Отказывает, если удалённый узел назвался нашим идентификатором.
    pub(crate) async fn handshake(
        &self,
        framed: &mut Framed<TcpStream, PeerCodec>,
        peer: &str,
    ) -> Result<NodeId, ClusterError> {
        let failed = |reason: String| ClusterError::HandshakeFailed {
            peer: peer.to_string(),
            reason,
        };

        let hello = Frame::Hello {
            node_id: self.local.clone(),
            advertised: self.advertised.clone(),
        };
        timeout(self.config.handshake_timeout, framed.send(hello))
            .await
            .map_err(|_| failed("handshake timed out".to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        let reply = timeout(self.config.handshake_timeout, framed.next())
            .await
            .map_err(|_| failed("handshake timed out".to_string()))?;

        match reply {
            Some(Ok(Frame::Hello {
                node_id,
                advertised,
            })) => {
                if node_id == self.local {
                    return Err(ClusterError::SelfConnection {
                        node_id: node_id.to_string(),
                    });
                }
                debug!(peer, remote = %node_id, advertised = %advertised, "Handshake completed");
                Ok(node_id)
            }
            Some(Ok(Frame::Message(_))) => Err(failed("expected HELLO, got MESSAGE".to_string())),
            Some(Err(e)) => Err(failed(e.to_string())),
            None => Err(failed("connection closed during handshake".to_string())),
        }
    }

    /// Обслуживает установленную связь до ошибки ввода-вывода или отмены.
    ///
    /// Входящие сообщения идут в локальную раздачу роутера; исходящие
    /// берутся из собственной очереди связи.
    pub(crate) async fn run_link(
        &self,
        framed: Framed<TcpStream, PeerCodec>,
        remote: NodeId,
        peer: &str,
    ) {
        let link = self.next_link_id();
        let (tx, mut outbound) = mpsc::channel(self.config.peer_queue.max(1));
        if self
            .events
            .send(LinkEvent::Up {
                node: remote.clone(),
                link,
                tx,
            })
            .await
            .is_err()
        {
            return;
        }
        self.stats.links_up.fetch_add(1, Ordering::Relaxed);
        info!(peer, remote = %remote, link, "Peer link up");

        let (mut sink, mut stream) = framed.split();

        // Запись и чтение опрашиваются независимо: заблокированная запись
        // не останавливает чтение и отмену.
        let writer = async {
            while let Some(msg) = outbound.recv().await {
                if let Err(e) = sink.send(Frame::Message(msg)).await {
                    warn!(peer, remote = %remote, error = %e, "Failed to write to peer");
                    return;
                }
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
        };
        let reader = async {
            loop {
                match stream.next().await {
                    Some(Ok(Frame::Message(msg))) => {
                        self.stats.received.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = self.router.deliver_remote(msg) {
                            warn!(peer, remote = %remote, error = %e, "Rejected message from peer");
                        }
                    }
                    Some(Ok(Frame::Hello { .. })) => {
                        debug!(peer, remote = %remote, "Unexpected HELLO after handshake ignored");
                    }
                    Some(Err(e)) => {
                        warn!(peer, remote = %remote, error = %e, "Peer stream error");
                        return;
                    }
                    None => {
                        debug!(peer, remote = %remote, "Peer closed connection");
                        return;
                    }
                }
            }
        };

        select! {
            _ = self.cancel.cancelled() => {}
            _ = writer => {}
            _ = reader => {}
        }

        let _ = self
            .events
            .send(LinkEvent::Down {
                node: remote.clone(),
                link,
            })
            .await;
        self.stats.links_down.fetch_add(1, Ordering::Relaxed);
        info!(peer, remote = %remote, link, "Peer link down");
    }
}

/// Задача одного настроенного узла:
/// `Disconnected → Connecting → Connected → Disconnected` с повтором по
/// экспоненциальной задержке. Завершается при отмене или если адрес
/// ведёт на этот же узел.
pub(crate) async fn peer_task(
    ctx: Arc<LinkContext>,
    peer: String,
    state: watch::Sender<PeerState>,
) {
    let mut backoff = ExponentialBackoff::new(ctx.config.backoff);

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        state.send_replace(PeerState::Connecting);

        match connect_once(&ctx, &peer, &state, &mut backoff).await {
            Attempt::SelfConnection => {
                state.send_replace(PeerState::Disconnected);
                warn!(peer = %peer, "Peer address points to this node, abandoning");
                break;
            }
            Attempt::Closed => {
                ctx.stats.disconnects.fetch_add(1, Ordering::Relaxed);
            }
            Attempt::Failed(err) => {
                ctx.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer, error = %err, "Peer connection attempt failed");
            }
        }
        state.send_replace(PeerState::Disconnected);

        let delay = backoff.next_delay();
        debug!(peer = %peer, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Reconnecting to peer");
        select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancel.cancelled() => break,
        }
    }
    state.send_replace(PeerState::Disconnected);
}

async fn connect_once(
    ctx: &LinkContext,
    peer: &str,
    state: &watch::Sender<PeerState>,
    backoff: &mut ExponentialBackoff,
) -> Attempt {
    let stream = select! {
        _ = ctx.cancel.cancelled() => return Attempt::Closed,
        res = timeout(ctx.config.connect_timeout, TcpStream::connect(peer)) => match res {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Attempt::Failed(ClusterError::PeerUnreachable {
                    peer: peer.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Attempt::Failed(ClusterError::ConnectTimeout {
                    peer: peer.to_string(),
                })
            }
        },
    };
    let _ = stream.set_nodelay(true);

    let mut framed = Framed::new(stream, PeerCodec::new(ctx.config.max_frame));
    let remote = match ctx.handshake(&mut framed, peer).await {
        Ok(remote) => remote,
        Err(ClusterError::SelfConnection { .. }) => return Attempt::SelfConnection,
        Err(err) => {
            ctx.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
            error!(peer, error = %err, "Peer handshake failed");
            return Attempt::Failed(err);
        }
    };

    backoff.reset();
    state.send_replace(PeerState::Connected(remote.clone()));
    ctx.run_link(framed, remote, peer).await;
    Attempt::Closed
}

impl fmt::Display for PeerState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected(node) => write!(f, "connected({node})"),
        }
    }
}
