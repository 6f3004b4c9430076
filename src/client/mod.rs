//! Client side of remote subscriptions.
//!
//! A `Client` plays two roles:
//! - Subscription initiator: asks a remote broker to deliver a topic to it, and
//!   on acceptance registers the handler on the local bus.
//! - Callback service: listens on the client's own address/path and republishes
//!   pushed events on the local bus (see [`service`]).
//!
//! ```text
//! subscribe ──▶ broker: ServerService.Register ──▶ accepted? ──▶ bus.subscribe
//! broker ──▶ client: ClientService.PushEvent ──▶ bus.publish ──▶ handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::{EventBus, EventHandler};
use crate::config::Config;
use crate::lifecycle::{ServiceLifecycle, StartError};
use crate::protocol::{SubscribeArg, SubscribeType, PUBLISH_SERVICE, REGISTER_SERVICE};
use crate::rpc::{RpcClient, RpcClientConfig, RpcError};

pub mod service;

pub use service::ClientService;

/// Errors reported by [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Start(#[from] StartError),

    /// The broker could not be dialed.
    #[error("connection failed: {0}")]
    Connection(#[source] RpcError),

    /// The registration round trip failed after connecting.
    #[error("register error: {0}")]
    Register(#[source] RpcError),
}

impl ClientError {
    /// Whether this is a rejected second `start`.
    pub fn is_already_started(&self) -> bool {
        matches!(self, ClientError::Start(StartError::AlreadyStarted))
    }
}

/// Broker's answer to a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The broker will push the topic; the handler is now on the local bus.
    Accepted,
    /// The broker refused; nothing was registered.
    Declined,
}

impl Registration {
    pub fn is_accepted(self) -> bool {
        self == Registration::Accepted
    }
}

/// Subscribes to topics on remote brokers and receives their pushes.
pub struct Client {
    bus: Arc<dyn EventBus>,
    address: String,
    path: String,
    rpc_config: RpcClientConfig,
    lifecycle: ServiceLifecycle,
}

impl Client {
    /// Create a client advertising `address` (`host:port`) and `path` to brokers.
    ///
    /// The callback service binds `address` itself on [`Client::start`].
    pub fn new(address: impl Into<String>, path: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            address: address.into(),
            path: path.into(),
            rpc_config: RpcClientConfig::default(),
            lifecycle: ServiceLifecycle::new("client"),
        }
    }

    /// Create a client from the `client`, `rpc` and `lifecycle` config sections.
    pub fn from_config(config: &Config, bus: Arc<dyn EventBus>) -> Self {
        Self::new(&config.client.address, &config.client.path, bus)
            .with_rpc_config(config.rpc.client_config())
            .with_shutdown_timeout(config.lifecycle.shutdown_timeout())
    }

    /// Set timeouts for outbound registration calls.
    pub fn with_rpc_config(mut self, config: RpcClientConfig) -> Self {
        self.rpc_config = config;
        self
    }

    /// Set how long `stop` waits for in-flight pushes.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle = self.lifecycle.with_shutdown_timeout(timeout);
        self
    }

    /// Advertised address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Routing path of the callback service.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Registration request this client sends for `topic`.
    pub fn registration_request(&self, topic: &str, mode: SubscribeType) -> SubscribeArg {
        SubscribeArg {
            caller_address: self.address.clone(),
            caller_path: self.path.clone(),
            callback_procedure: PUBLISH_SERVICE.to_string(),
            mode,
            topic: topic.to_string(),
        }
    }

    /// Subscribe to every future occurrence of `topic` on a remote broker.
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
        server_address: &str,
        server_path: &str,
    ) -> Result<Registration, ClientError> {
        self.do_subscribe(topic, handler, server_address, server_path, SubscribeType::Permanent)
            .await
    }

    /// Subscribe to the next occurrence of `topic` on a remote broker.
    ///
    /// The broker enforces the cutoff; locally the handler is registered the same
    /// way as for [`Client::subscribe`].
    pub async fn subscribe_once(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
        server_address: &str,
        server_path: &str,
    ) -> Result<Registration, ClientError> {
        self.do_subscribe(topic, handler, server_address, server_path, SubscribeType::Once)
            .await
    }

    #[tracing::instrument(
        name = "client.subscribe",
        skip(self, handler),
        fields(client = %self.address)
    )]
    async fn do_subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
        server_address: &str,
        server_path: &str,
        mode: SubscribeType,
    ) -> Result<Registration, ClientError> {
        let rpc = RpcClient::dial(server_address, server_path, &self.rpc_config)
            .await
            .map_err(|e| {
                warn!(error = %e, "Broker not reachable");
                ClientError::Connection(e)
            })?;

        let request = self.registration_request(topic, mode);
        let reply = rpc.call::<_, bool>(REGISTER_SERVICE, &request).await;
        rpc.close();

        let accepted = reply.map_err(|e| {
            warn!(error = %e, "Registration failed");
            ClientError::Register(e)
        })?;

        if !accepted {
            info!("Registration declined by broker");
            return Ok(Registration::Declined);
        }

        self.bus.subscribe(topic, handler).await;
        info!("Registration accepted");
        Ok(Registration::Accepted)
    }

    /// Start the callback service on the advertised address.
    ///
    /// A second call while started fails with [`StartError::AlreadyStarted`].
    pub async fn start(&self) -> Result<(), ClientError> {
        let router = Arc::new(ClientService::new(Arc::clone(&self.bus)))
            .rpc_server()
            .router(&self.path);
        self.lifecycle.start(&self.address, router).await?;
        Ok(())
    }

    /// Stop the callback service. No-op when not started.
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    pub async fn is_started(&self) -> bool {
        self.lifecycle.is_started().await
    }

    /// Address the callback service is bound to, when started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr().await
    }
}
