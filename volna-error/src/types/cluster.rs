use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки кластерной синхронизации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Узел недоступен
    PeerUnreachable { peer: String, reason: String },
    /// Таймаут подключения к узлу
    ConnectTimeout { peer: String },
    /// Рукопожатие не состоялось
    HandshakeFailed { peer: String, reason: String },
    /// Узел подключился сам к себе
    SelfConnection { node_id: String },
    /// Не удалось открыть порт для входящих соединений
    Bind { address: String, reason: String },
    /// Соединение с узлом закрыто
    LinkClosed { peer: String },
    /// Адрес узла не удалось разобрать
    InvalidPeerAddress { address: String },
}

impl std::fmt::Display for ClusterError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::PeerUnreachable { peer, reason } => {
                write!(f, "Peer {peer} unreachable: {reason}")
            }
            Self::ConnectTimeout { peer } => write!(f, "Connect timeout to peer {peer}"),
            Self::HandshakeFailed { peer, reason } => {
                write!(f, "Handshake with {peer} failed: {reason}")
            }
            Self::SelfConnection { node_id } => {
                write!(f, "Peer announced our own node id {node_id}")
            }
            Self::Bind { address, reason } => {
                write!(f, "Cannot listen on {address}: {reason}")
            }
            Self::LinkClosed { peer } => write!(f, "Link to {peer} closed"),
            Self::InvalidPeerAddress { address } => write!(f, "Invalid peer address: {address}"),
        }
    }
}

impl std::error::Error for ClusterError {}

impl ErrorExt for ClusterError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::PeerUnreachable { .. } => StatusCode::PeerUnreachable,
            Self::ConnectTimeout { .. } => StatusCode::Timeout,
            Self::HandshakeFailed { .. } => StatusCode::HandshakeFailed,
            Self::SelfConnection { .. } => StatusCode::SelfConnection,
            Self::Bind { .. } => StatusCode::Io,
            Self::LinkClosed { .. } => StatusCode::ConnectionClosed,
            Self::InvalidPeerAddress { .. } => StatusCode::InvalidArgs,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::PeerUnreachable { .. } | Self::ConnectTimeout { .. } => {
                "Cluster peer unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "cluster".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::PeerUnreachable { peer, .. }
            | Self::ConnectTimeout { peer }
            | Self::HandshakeFailed { peer, .. }
            | Self::LinkClosed { peer } => tags.push(("peer", peer.clone())),
            _ => {}
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_error_codes() {
        let err = ClusterError::HandshakeFailed {
            peer: "127.0.0.1:9000".to_string(),
            reason: "bad magic".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::HandshakeFailed);
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "peer" && v == "127.0.0.1:9000"));

        let unreachable = ClusterError::PeerUnreachable {
            peer: "p".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(unreachable.client_message(), "Cluster peer unavailable");
        assert_eq!(unreachable.status_code(), StatusCode::PeerUnreachable);
    }
}
