use std::{collections::HashSet, path::Path, time::Duration};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backoff::BackoffConfig,
    cluster::{ClusterConfig, MAX_FRAME_SIZE},
    connector::{ConnectorConfig, ShutdownPolicy},
    logging::LoggingConfig,
    pubsub::{NodeId, RouterConfig},
};

/// Префикс переменных окружения: `VOLNA__NODE__ID=2`.
pub const ENV_PREFIX: &str = "VOLNA";
/// Разделитель вложенных ключей в переменных окружения.
pub const ENV_SEPARATOR: &str = "__";

/// Разброс задержек повтора в процентах.
const BACKOFF_JITTER_PERCENT: u8 = 20;

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Полная конфигурация узла.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSettings,
    pub cluster: ClusterSettings,
    pub connectors: Vec<ConnectorSettings>,
    pub logging: LoggingConfig,
}

/// Секция `node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Идентификатор узла; если не задан, генерируется UUID
    pub id: Option<String>,
    /// Ёмкость очереди локального подписчика
    pub sink_capacity: usize,
    pub max_message_size: usize,
    pub dedup_window: usize,
}

/// Секция `cluster`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub listen: Option<String>,
    pub advertised: Option<String>,
    pub peers: Vec<String>,
    pub peer_queue: usize,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Ёмкость очереди между роутером и синхронизатором
    pub replication_queue: usize,
    pub max_frame: usize,
}

/// Элемент списка `connectors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    pub name: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub send_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub shutdown: ShutdownPolicy,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Settings {
    /// Значения по умолчанию и переменные окружения.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None)
    }

    /// Значения по умолчанию, необязательный TOML-файл и переменные
    /// окружения (в порядке возрастания приоритета).
    pub fn load_from(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("node.sink_capacity", 1024_u64)?
            .set_default("cluster.replication_queue", 1024_u64)?;

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .list_separator(",")
                    .with_list_parse_key("cluster.peers")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Отклоняет нулевые ёмкости, пустые имена коннекторов и адреса не
    /// вида `host:port`.
    pub fn validate(&self) -> Result<(), SettingsError> {
        non_zero("node.sink_capacity", self.node.sink_capacity)?;
        non_zero("node.max_message_size", self.node.max_message_size)?;
        if let Some(id) = &self.node.id {
            if id.trim().is_empty() {
                return Err(invalid("node.id", "must not be empty"));
            }
        }

        non_zero("cluster.peer_queue", self.cluster.peer_queue)?;
        non_zero("cluster.replication_queue", self.cluster.replication_queue)?;
        non_zero("cluster.max_frame", self.cluster.max_frame)?;
        if let Some(listen) = &self.cluster.listen {
            check_address("cluster.listen", listen)?;
        }
        for peer in &self.cluster.peers {
            check_address("cluster.peers", peer)?;
        }

        let mut names = HashSet::new();
        for connector in &self.connectors {
            if connector.name.trim().is_empty() {
                return Err(invalid("connectors.name", "must not be empty"));
            }
            if !names.insert(connector.name.as_str()) {
                return Err(invalid(
                    "connectors.name",
                    format!("duplicate connector '{}'", connector.name),
                ));
            }
            non_zero("connectors.workers", connector.workers)?;
            non_zero("connectors.queue_capacity", connector.queue_capacity)?;
        }

        self.logging
            .validate()
            .map_err(|e| invalid("logging.level", e.to_string()))
    }

    /// Идентификатор узла из настроек или случайный.
    pub fn node_id(&self) -> NodeId {
        match &self.node.id {
            Some(id) => NodeId::new(id.as_str()),
            None => NodeId::random(),
        }
    }

    pub fn router_config(
        &self,
        node_id: NodeId,
    ) -> RouterConfig {
        RouterConfig {
            node_id,
            max_message_size: self.node.max_message_size,
            dedup_window: self.node.dedup_window,
        }
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        let c = &self.cluster;
        ClusterConfig {
            listen: c.listen.clone(),
            advertised: c.advertised.clone(),
            peers: c.peers.clone(),
            peer_queue: c.peer_queue,
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(c.handshake_timeout_ms),
            backoff: backoff(c.backoff_base_ms, c.backoff_max_ms),
            max_frame: c.max_frame,
        }
    }

    /// Нужен ли синхронизатор: есть слушатель или хотя бы один узел.
    pub fn cluster_enabled(&self) -> bool {
        self.cluster.listen.is_some() || !self.cluster.peers.is_empty()
    }
}

impl ConnectorSettings {
    pub fn to_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            name: self.name.clone(),
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            max_retries: self.max_retries,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            backoff: backoff(self.backoff_base_ms, self.backoff_max_ms),
            shutdown: self.shutdown,
        }
    }
}

fn backoff(
    base_ms: u64,
    max_ms: u64,
) -> BackoffConfig {
    BackoffConfig {
        base: Duration::from_millis(base_ms),
        max: Duration::from_millis(max_ms.max(base_ms)),
        jitter_percent: BACKOFF_JITTER_PERCENT,
    }
}

fn invalid(
    field: &str,
    reason: impl Into<String>,
) -> SettingsError {
    SettingsError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn non_zero(
    field: &str,
    value: usize,
) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn check_address(
    field: &str,
    addr: &str,
) -> Result<(), SettingsError> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(invalid(field, format!("'{addr}' is not host:port")));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid(field, format!("'{addr}' is not host:port")));
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Settings
////////////////////////////////////////////////////////////////////////////////

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: None,
            sink_capacity: 1024,
            max_message_size: 1024 * 1024,
            dedup_window: 4096,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            listen: None,
            advertised: None,
            peers: Vec::new(),
            peer_queue: 1024,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            replication_queue: 1024,
            max_frame: MAX_FRAME_SIZE,
        }
    }
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            workers: 4,
            queue_capacity: 1024,
            max_retries: 3,
            send_timeout_ms: 10_000,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            shutdown: ShutdownPolicy::Drain,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;

    fn write_toml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// Тест проверяет загрузку значений по умолчанию.
    #[test]
    #[serial]
    fn test_load_defaults() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.node.sink_capacity, 1024);
        assert!(settings.node.id.is_none());
        assert!(settings.connectors.is_empty());
        assert!(!settings.cluster_enabled());
    }

    /// Тест проверяет чтение TOML-файла со всеми секциями.
    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_toml(
            r#"
[node]
id = "node-a"
dedup_window = 16

[cluster]
listen = "127.0.0.1:7001"
peers = ["127.0.0.1:7002", "127.0.0.1:7003"]
connect_timeout_ms = 250

[[connectors]]
name = "fcm"
workers = 2
max_retries = 5
shutdown = "discard"

[logging]
level = "debug"
format = "json"
"#,
        );

        let settings = Settings::load_from(Some(file.path())).unwrap();
        assert_eq!(settings.node_id().as_str(), "node-a");
        assert_eq!(settings.node.dedup_window, 16);
        assert_eq!(settings.cluster.peers.len(), 2);

        let cluster = settings.cluster_config();
        assert_eq!(cluster.listen.as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(cluster.connect_timeout, Duration::from_millis(250));

        let connector = settings.connectors[0].to_config();
        assert_eq!(connector.name, "fcm");
        assert_eq!(connector.workers, 2);
        assert_eq!(connector.max_retries, 5);
        assert_eq!(connector.queue_capacity, 1024);
        assert_eq!(connector.shutdown, ShutdownPolicy::Discard);

        assert_eq!(settings.logging.level, "debug");
    }

    /// Тест проверяет приоритет переменных окружения над файлом.
    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_toml("[node]\nid = \"from-file\"\n");
        env::set_var("VOLNA__NODE__ID", "from-env");
        env::set_var("VOLNA__CLUSTER__PEERS", "10.0.0.1:7000,10.0.0.2:7000");

        let result = Settings::load_from(Some(file.path()));

        env::remove_var("VOLNA__NODE__ID");
        env::remove_var("VOLNA__CLUSTER__PEERS");

        let settings = result.unwrap();
        assert_eq!(settings.node.id.as_deref(), Some("from-env"));
        assert_eq!(
            settings.cluster.peers,
            vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()]
        );
        assert!(settings.cluster_enabled());
    }

    /// Тест проверяет отказ при отсутствующем обязательном файле.
    #[test]
    #[serial]
    fn test_missing_file() {
        let err = Settings::load_from(Some(Path::new("/nonexistent/volna.toml"))).unwrap_err();
        assert!(matches!(err, SettingsError::Load(_)));
    }

    /// Тест проверяет отказ для нулевой ёмкости и плохого адреса.
    #[test]
    fn test_validate_rejects() {
        let mut settings = Settings::default();
        settings.node.sink_capacity = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { field, .. }) if field == "node.sink_capacity"
        ));

        let mut settings = Settings::default();
        settings.cluster.peers.push("no-port".to_string());
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.cluster.peers.push("host:notaport".to_string());
        assert!(settings.validate().is_err());
    }

    /// Тест проверяет отказ для повторяющихся имён коннекторов.
    #[test]
    fn test_validate_duplicate_connector() {
        let connector = ConnectorSettings {
            name: "fcm".to_string(),
            ..Default::default()
        };
        let settings = Settings {
            connectors: vec![connector.clone(), connector],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    /// Тест проверяет генерацию идентификатора и нижнюю границу задержки.
    #[test]
    fn test_node_id_and_backoff() {
        let settings = Settings::default();
        assert_ne!(settings.node_id(), settings.node_id());

        let connector = ConnectorSettings {
            name: "x".to_string(),
            backoff_base_ms: 500,
            backoff_max_ms: 100,
            ..Default::default()
        };
        let cfg = connector.to_config();
        assert_eq!(cfg.backoff.max, Duration::from_millis(500));
    }
}
