//! Application configuration.
//!
//! Client, broker and transport settings in one struct, loaded from YAML
//! files and `BUSBRIDGE__*` environment variables.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::lifecycle::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::rpc::{RpcClientConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::server::DEFAULT_PUSH_TIMEOUT;

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "busbridge.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BUSBRIDGE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BUSBRIDGE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BUSBRIDGE_LOG";

/// Default address of a client's callback service.
pub const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1:2015";
/// Default routing path of a client's callback service.
pub const DEFAULT_CLIENT_PATH: &str = "/_client_bus_";
/// Default address of a broker.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:2010";
/// Default routing path of a broker.
pub const DEFAULT_SERVER_PATH: &str = "/_server_bus_";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Callback service of a subscribing client.
    pub client: ClientConfig,
    /// Broker accepting registrations.
    pub server: ServerConfig,
    /// Outbound call timeouts.
    pub rpc: RpcConfig,
    /// Start/stop behaviour shared by client and broker.
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` advertised to brokers and bound on start.
    pub address: String,
    pub path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CLIENT_ADDRESS.to_string(),
            path: DEFAULT_CLIENT_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub path: String,
    /// Topics offered to clients. Empty offers every topic.
    pub topics: Vec<String>,
    /// Time allowed for one push to a subscribed client.
    pub push_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            path: DEFAULT_SERVER_PATH.to_string(),
            topics: Vec::new(),
            push_timeout_ms: DEFAULT_PUSH_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Topic allow-list, or `None` when every topic is offered.
    pub fn offered_topics(&self) -> Option<HashSet<String>> {
        if self.topics.is_empty() {
            None
        } else {
            Some(self.topics.iter().cloned().collect())
        }
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub connect_timeout_ms: u64,
    /// Unset waits indefinitely for a reply.
    pub request_timeout_ms: Option<u64>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            request_timeout_ms: None,
        }
    }
}

impl RpcConfig {
    pub fn client_config(&self) -> RpcClientConfig {
        let config = RpcClientConfig::default()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        match self.request_timeout_ms {
            Some(ms) => config.with_request_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long `stop` waits for in-flight calls before aborting them.
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `busbridge.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing: both services on free loopback ports.
    ///
    /// The ports are concrete because the client advertises its address to
    /// brokers, which must be able to dial it back.
    pub fn for_test() -> Self {
        // Both listeners stay bound until the addresses are read, so the ports differ.
        let client = std::net::TcpListener::bind("127.0.0.1:0");
        let server = std::net::TcpListener::bind("127.0.0.1:0");

        let mut config = Self::default();
        config.client.address = loopback_address(client);
        config.server.address = loopback_address(server);
        config
    }
}

/// Address a throwaway listener was given. Falls back to an ephemeral bind
/// address, which serves but cannot be advertised.
fn loopback_address(listener: std::io::Result<std::net::TcpListener>) -> String {
    listener
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "127.0.0.1:0".to_string())
}
