// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Hub configuration.
//!
//! Loaded from a TOML file, then overridden by the environment and the
//! command line.

use hiveot_messaging::roles;
use hiveot_transports::TransportConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Data root override.
pub const ENV_HOME: &str = "HIVEOT_HOME";
/// Log filter override.
pub const ENV_LOG_LEVEL: &str = "HIVEOT_LOG_LEVEL";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Data root. Relative storage paths resolve against it.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Log filter, e.g. `info` or `hiveot_runtime=debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long a forwarded request may wait for its agent.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Interval of the forwarding-table sweep.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,

    /// Interval of the digital-twin write-behind.
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,

    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// Check request inputs and notification data against the TD schemas.
    #[serde(default = "default_true")]
    pub strict: bool,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Clients of the built-in authenticator.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

/// HTTP, SSE and WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// MQTT broker listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// MQTT over TCP
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT over WebSocket
    #[serde(default = "default_mqtt_ws_port")]
    pub ws_port: u16,
}

/// Bucket backend of the digital-twin store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file, relative to `home` unless absolute.
    #[serde(default = "default_storage_file")]
    pub file: PathBuf,
}

/// Static client account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub password: String,
    pub role: String,
}

fn default_home() -> PathBuf {
    PathBuf::from("./hiveot")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_timeout() -> u64 {
    60
}

fn default_gc_interval() -> u64 {
    5
}

fn default_save_interval() -> u64 {
    3
}

fn default_session_idle_timeout() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8444
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_mqtt_ws_port() -> u16 {
    8884
}

fn default_storage_file() -> PathBuf {
    PathBuf::from("digitwin.db")
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_http_port(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_mqtt_port(),
            ws_port: default_mqtt_ws_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            file: default_storage_file(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            log_level: default_log_level(),
            rpc_timeout_secs: default_rpc_timeout(),
            gc_interval_secs: default_gc_interval(),
            save_interval_secs: default_save_interval(),
            session_idle_timeout_secs: default_session_idle_timeout(),
            strict: true,
            http: HttpConfig::default(),
            mqtt: MqttConfig::default(),
            storage: StorageConfig::default(),
            clients: Vec::new(),
        }
    }
}

const KNOWN_ROLES: &[&str] = &[
    roles::VIEWER,
    roles::OPERATOR,
    roles::MANAGER,
    roles::ADMIN,
    roles::AGENT,
    roles::SERVICE,
];

impl HubConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = format!(
            "# HiveOT hub configuration\n# Generated by hiveot-hub gen-config\n\n{}",
            toml::to_string_pretty(self)?
        );
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `HIVEOT_HOME` and `HIVEOT_LOG_LEVEL` if set.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(home) = lookup(ENV_HOME).filter(|v| !v.is_empty()) {
            self.home = PathBuf::from(home);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if EnvFilter::try_new(&self.log_level).is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid log level '{}'",
                self.log_level
            )));
        }
        for (name, value) in [
            ("rpc_timeout_secs", self.rpc_timeout_secs),
            ("gc_interval_secs", self.gc_interval_secs),
            ("save_interval_secs", self.save_interval_secs),
            ("session_idle_timeout_secs", self.session_idle_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if self.http.enabled {
            parse_addr(&self.http.bind, self.http.port)?;
        }
        if self.mqtt.enabled {
            parse_addr(&self.mqtt.bind, self.mqtt.port)?;
            parse_addr(&self.mqtt.bind, self.mqtt.ws_port)?;
            if self.mqtt.port != 0 && self.mqtt.port == self.mqtt.ws_port {
                return Err(ConfigError::Invalid(format!(
                    "MQTT TCP and WebSocket share port {}",
                    self.mqtt.port
                )));
            }
            if self.http.enabled
                && self.http.port != 0
                && self.http.bind == self.mqtt.bind
                && (self.http.port == self.mqtt.port || self.http.port == self.mqtt.ws_port)
            {
                return Err(ConfigError::Invalid(format!(
                    "HTTP and MQTT share port {}",
                    self.http.port
                )));
            }
        }

        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.file.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("storage file is empty".into()));
        }

        let mut ids = HashSet::new();
        for client in &self.clients {
            if client.id.is_empty() {
                return Err(ConfigError::Invalid("client with empty id".into()));
            }
            if !ids.insert(client.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate client '{}'",
                    client.id
                )));
            }
            if !KNOWN_ROLES.contains(&client.role.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "client '{}' has unknown role '{}'",
                    client.id, client.role
                )));
            }
        }
        Ok(())
    }

    /// Location of the digital-twin database.
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.file.is_absolute() {
            self.storage.file.clone()
        } else {
            self.home.join(&self.storage.file)
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Listener addresses of the enabled bindings.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            http_addr: self
                .http
                .enabled
                .then(|| format!("{}:{}", self.http.bind, self.http.port)),
            mqtt_tcp_addr: self
                .mqtt
                .enabled
                .then(|| format!("{}:{}", self.mqtt.bind, self.mqtt.port)),
            mqtt_ws_addr: self
                .mqtt
                .enabled
                .then(|| format!("{}:{}", self.mqtt.bind, self.mqtt.ws_port)),
        }
    }

    /// Configuration for tests: in-memory storage, loopback listeners on
    /// ephemeral ports.
    pub fn for_testing() -> Self {
        let mut config = Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                file: default_storage_file(),
            },
            ..Default::default()
        };
        config.http.bind = "127.0.0.1".into();
        config.http.port = 0;
        config.mqtt.bind = "127.0.0.1".into();
        config.mqtt.port = 0;
        config.mqtt.ws_port = 0;
        config
    }
}

fn parse_addr(bind: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{}:{}", bind, port)
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid listen address '{}:{}'", bind, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rpc_timeout(), Duration::from_secs(60));
        assert_eq!(config.http.port, 8444);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.ws_port, 8884);
        assert_eq!(config.storage_path(), PathBuf::from("./hiveot/digitwin.db"));
        HubConfig::for_testing().validate().unwrap();
    }

    #[test]
    fn test_parse_partial_file() {
        let config: HubConfig = toml::from_str(
            r#"
            home = "/var/lib/hiveot"
            strict = false

            [http]
            port = 9000

            [storage]
            backend = "memory"

            [[clients]]
            id = "admin"
            password = "secret"
            role = "admin"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(!config.strict);
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.bind, "0.0.0.0");
        assert!(config.mqtt.enabled);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.clients[0].role, "admin");
        assert_eq!(
            config.storage_path(),
            PathBuf::from("/var/lib/hiveot/digitwin.db")
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        let mut config = HubConfig::default();
        config.clients.push(ClientConfig {
            id: "agent1".into(),
            password: "pw".into(),
            role: roles::AGENT.into(),
        });
        config.to_file(&path).unwrap();
        assert_eq!(HubConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HubConfig::default();
        config.rpc_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HubConfig::default();
        config.mqtt.ws_port = config.mqtt.port;
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.http.bind = "not an address".into();
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        config.clients.push(ClientConfig {
            id: "x".into(),
            password: "p".into(),
            role: "superuser".into(),
        });
        assert!(config.validate().is_err());

        let mut config = HubConfig::default();
        let client = ClientConfig {
            id: "x".into(),
            password: "p".into(),
            role: roles::VIEWER.into(),
        };
        config.clients = vec![client.clone(), client];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HubConfig::default();
        config.apply_vars(|key| match key {
            ENV_HOME => Some("/tmp/hive".to_string()),
            ENV_LOG_LEVEL => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.home, PathBuf::from("/tmp/hive"));
        assert_eq!(config.log_level, "debug");

        let mut config = HubConfig::default();
        config.apply_vars(|_| Some(String::new()));
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_transport_config_follows_enabled_flags() {
        let mut config = HubConfig::for_testing();
        config.mqtt.enabled = false;
        let tc = config.transport_config();
        assert_eq!(tc.http_addr.as_deref(), Some("127.0.0.1:0"));
        assert!(tc.mqtt_tcp_addr.is_none());
        assert!(tc.mqtt_ws_addr.is_none());
    }
}
