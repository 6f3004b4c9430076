//! Broker side of remote subscriptions.
//!
//! A `Server` owns a local bus whose topics remote clients can subscribe to.
//! Registration arrives on `ServerService.Register`; from then on every
//! publish of the topic on the broker's bus is pushed to the client's callback
//! procedure.
//!
//! Delivery is best effort: one dial and one call per event, failures are
//! logged and not retried.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::bus::{BusError, EventBus, EventHandler, PublishResult, Result as BusResult};
use crate::config::Config;
use crate::lifecycle::{ServiceLifecycle, StartError, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::protocol::{ClientArg, EventArgs, SubscribeArg, SubscribeType, REGISTER_SERVICE};
use crate::rpc::{RpcClient, RpcClientConfig, RpcError, RpcServer};

mod registry;

use registry::SubscriberRegistry;

/// Default time allowed for one push to a subscribed client.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by [`Server`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Start(#[from] StartError),
}

/// Broker settings beyond address and path.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Topics clients may subscribe to. `None` accepts every topic.
    pub topics: Option<HashSet<String>>,
    /// Timeouts for outbound pushes.
    ///
    /// Pushes for one publish run one after another, so a subscriber that never
    /// answers holds up every later subscriber of the topic until
    /// `request_timeout` expires. Leaving it unset lets one hung client stall
    /// the broker's publishes indefinitely.
    pub rpc: RpcClientConfig,
    /// How long `stop` waits for in-flight registrations.
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            topics: None,
            rpc: RpcClientConfig::default().with_request_timeout(DEFAULT_PUSH_TIMEOUT),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Registration service exposed by a broker.
pub struct ServerService {
    bus: Arc<dyn EventBus>,
    registry: RwLock<SubscriberRegistry>,
    topics: Option<HashSet<String>>,
    rpc_config: RpcClientConfig,
    http: OnceCell<reqwest::Client>,
}

impl ServerService {
    fn new(bus: Arc<dyn EventBus>, options: &ServerOptions) -> Self {
        Self {
            bus,
            registry: RwLock::new(SubscriberRegistry::default()),
            topics: options.topics.clone(),
            rpc_config: options.rpc.clone(),
            http: OnceCell::new(),
        }
    }

    /// HTTP client shared by every push from this broker.
    async fn http(&self) -> Result<reqwest::Client, RpcError> {
        self.http
            .get_or_try_init(|| async { self.rpc_config.http_client() })
            .await
            .cloned()
    }

    /// Drop the registration for `arg` if its bus handler is gone.
    ///
    /// A once-handler leaves the bus as soon as a publish selects it, while its
    /// push may still be running.
    async fn prune(&self, arg: &SubscribeArg) {
        let mut registry = self.registry.write().await;
        if let Some(id) = registry.subscription(arg) {
            if !self.bus.is_subscribed(&arg.topic, id).await {
                registry.remove(arg);
            }
        }
    }

    /// Handle a registration request.
    ///
    /// A request identical to one already held is accepted without adding a
    /// second delivery. A held Once registration whose delivery has already
    /// started no longer counts, so the request subscribes afresh.
    #[tracing::instrument(
        name = "server.register",
        skip_all,
        fields(topic = %arg.topic, client = %arg.caller_address, mode = %arg.mode)
    )]
    pub async fn register(self: &Arc<Self>, arg: SubscribeArg) -> bool {
        if let Some(topics) = &self.topics {
            if !topics.contains(&arg.topic) {
                info!("Registration declined, topic not offered");
                return false;
            }
        }

        let mut registry = self.registry.write().await;
        if let Some(id) = registry.subscription(&arg) {
            if self.bus.is_subscribed(&arg.topic, id).await {
                debug!("Client already subscribed");
                return true;
            }
            registry.remove(&arg);
        }

        let forwarder: Arc<dyn EventHandler> = Arc::new(Forwarder {
            service: Arc::downgrade(self),
            subscriber: arg.clone(),
        });
        let id = match arg.mode {
            SubscribeType::Permanent => self.bus.subscribe(&arg.topic, forwarder).await,
            SubscribeType::Once => self.bus.subscribe_once(&arg.topic, forwarder).await,
        };
        registry.insert(arg, id);

        info!("Client subscribed");
        true
    }

    /// RPC registry exposing [`REGISTER_SERVICE`].
    pub fn rpc_server(self: Arc<Self>) -> RpcServer {
        RpcServer::new().register(REGISTER_SERVICE, move |arg: SubscribeArg| {
            let service = Arc::clone(&self);
            async move { Ok(service.register(arg).await) }
        })
    }
}

/// Bus handler pushing one topic to one remote client.
struct Forwarder {
    service: Weak<ServerService>,
    subscriber: SubscribeArg,
}

impl EventHandler for Forwarder {
    fn handle(&self, args: Arc<EventArgs>) -> BoxFuture<'static, BusResult<()>> {
        let service = self.service.clone();
        let subscriber = self.subscriber.clone();

        Box::pin(async move {
            let Some(service) = service.upgrade() else {
                return Err(BusError::Handler("broker dropped".to_string()));
            };

            // The bus already dropped the once-handler; drop the registration too.
            if subscriber.mode == SubscribeType::Once {
                service.prune(&subscriber).await;
            }

            let result = match service.http().await {
                Ok(http) => push(http, &subscriber, (*args).clone()).await,
                Err(e) => Err(e),
            };

            result.map_err(|e| {
                warn!(
                    topic = %subscriber.topic,
                    client = %subscriber.caller_address,
                    error = %e,
                    "Push to client failed"
                );
                BusError::Handler(e.to_string())
            })
        })
    }
}

async fn push(
    http: reqwest::Client,
    subscriber: &SubscribeArg,
    args: EventArgs,
) -> Result<(), RpcError> {
    let rpc = RpcClient::dial_with(http, &subscriber.caller_address, &subscriber.caller_path).await?;
    let payload = ClientArg {
        topic: subscriber.topic.clone(),
        args,
    };
    let reply = rpc
        .call::<_, bool>(&subscriber.callback_procedure, &payload)
        .await;
    rpc.close();

    let accepted = reply?;
    debug!(
        topic = %subscriber.topic,
        client = %subscriber.caller_address,
        accepted,
        "Pushed event to client"
    );
    Ok(())
}

/// Broker accepting remote subscriptions to topics on its local bus.
pub struct Server {
    address: String,
    path: String,
    service: Arc<ServerService>,
    lifecycle: ServiceLifecycle,
}

impl Server {
    /// Create a broker serving registrations on `address` (`host:port`) at `path`.
    pub fn new(address: impl Into<String>, path: impl Into<String>, bus: Arc<dyn EventBus>) -> Self {
        Self::with_options(address, path, bus, ServerOptions::default())
    }

    pub fn with_options(
        address: impl Into<String>,
        path: impl Into<String>,
        bus: Arc<dyn EventBus>,
        options: ServerOptions,
    ) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            service: Arc::new(ServerService::new(bus, &options)),
            lifecycle: ServiceLifecycle::new("server")
                .with_shutdown_timeout(options.shutdown_timeout),
        }
    }

    /// Create a broker from the `server`, `rpc` and `lifecycle` config sections.
    pub fn from_config(config: &Config, bus: Arc<dyn EventBus>) -> Self {
        let options = ServerOptions {
            topics: config.server.offered_topics(),
            rpc: config
                .rpc
                .client_config()
                .with_request_timeout(config.server.push_timeout()),
            shutdown_timeout: config.lifecycle.shutdown_timeout(),
        };
        Self::with_options(&config.server.address, &config.server.path, bus, options)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Start serving registrations.
    pub async fn start(&self) -> Result<(), ServerError> {
        let router = Arc::clone(&self.service).rpc_server().router(&self.path);
        self.lifecycle.start(&self.address, router).await?;
        Ok(())
    }

    /// Stop serving registrations. Existing registrations keep receiving pushes.
    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }

    pub async fn is_started(&self) -> bool {
        self.lifecycle.is_started().await
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr().await
    }

    /// Register a client directly, as if it had called `ServerService.Register`.
    pub async fn register(&self, arg: SubscribeArg) -> bool {
        self.service.register(arg).await
    }

    /// Publish on the broker's bus, pushing to every subscribed client.
    pub async fn publish(&self, topic: &str, args: EventArgs) -> PublishResult {
        self.service.bus.publish(topic, args).await
    }

    /// Registrations currently held for `topic`.
    pub async fn subscribers(&self, topic: &str) -> Vec<SubscribeArg> {
        self.service.registry.read().await.subscribers(topic)
    }

    pub async fn has_client_subscribed(&self, arg: &SubscribeArg) -> bool {
        self.service.registry.read().await.contains(arg)
    }

    /// Drop a registration and stop pushing to it.
    pub async fn remove_subscriber(&self, arg: &SubscribeArg) -> bool {
        let removed = self.service.registry.write().await.remove(arg);
        match removed {
            Some(id) => {
                self.service.bus.unsubscribe(&arg.topic, id).await;
                info!(topic = %arg.topic, client = %arg.caller_address, "Client unsubscribed");
                true
            }
            None => false,
        }
    }
}
