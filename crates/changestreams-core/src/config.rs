use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::Backoff;
use crate::types::EntityName;

// Protocol constants: hub and client must agree on these
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_CHANNEL: &str = "changestreams";
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024; // client frames are tiny: subscribe/unsubscribe/ping
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // tick event cadence
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024; // frames buffered per connection before it counts as dead

/// Top-level config (changestreams.toml + CHANGESTREAMS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChangeStreamsConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Unauthenticated connections are closed after this long.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            token: Some("change-me".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size for trigger installation. The listener holds its own
    /// dedicated connection outside the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Change emitter + listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// NOTIFY channel shared by every trigger.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Install (or refresh) the triggers when the hub starts.
    #[serde(default = "bool_true")]
    pub install_triggers: bool,
    /// Tracked tables. Empty means one table per entity, keyed by `Id`.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default = "default_listener_backoff")]
    pub backoff: BackoffConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            install_triggers: true,
            tables: Vec::new(),
            backoff: default_listener_backoff(),
        }
    }
}

impl ListenerConfig {
    /// Configured tables, or the default one-table-per-entity mapping.
    pub fn tracked_tables(&self) -> Vec<TableConfig> {
        if self.tables.is_empty() {
            EntityName::ALL.into_iter().map(TableConfig::for_entity).collect()
        } else {
            self.tables.clone()
        }
    }
}

/// Maps one physical table to its logical entity name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    pub entity: EntityName,
    pub table: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

impl TableConfig {
    pub fn for_entity(entity: EntityName) -> Self {
        Self {
            entity,
            table: entity.as_str().to_string(),
            key_column: default_key_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffConfig {
    pub fn to_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_url")]
    pub url: String,
    pub token: Option<String>,
    #[serde(default = "default_client_backoff")]
    pub backoff: BackoffConfig,
    /// Give up after this many consecutive failed connects. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Drop the connection when the hub sends nothing (not even a tick) for this long.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            token: None,
            backoff: default_client_backoff(),
            max_attempts: None,
            liveness_timeout_secs: default_liveness_timeout_secs(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    HANDSHAKE_TIMEOUT_MS
}
fn default_liveness_timeout_secs() -> u64 {
    2 * HEARTBEAT_INTERVAL_SECS
}
fn default_key_column() -> String {
    "Id".to_string()
}
fn default_database_url() -> String {
    "postgres://localhost/changestreams".to_string()
}
fn default_max_connections() -> u32 {
    2
}
fn default_client_url() -> String {
    format!("ws://{}:{}/ws", DEFAULT_BIND, DEFAULT_PORT)
}
fn default_listener_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 500,
        max_ms: 30_000,
    }
}
fn default_client_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 250,
        max_ms: 10_000,
    }
}

impl ChangeStreamsConfig {
    /// Load config from a TOML file with CHANGESTREAMS_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CHANGESTREAMS_LISTENER__INSTALL_TRIGGERS=false`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChangeStreamsConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHANGESTREAMS_").split("__"))
            .extract()
            .map_err(|e| crate::error::ChangeStreamsError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.changestreams/changestreams.toml", home)
}
