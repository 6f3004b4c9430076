//! Test utilities shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::bus::{BusError, EventHandler, Result as BusResult};
use crate::lifecycle::ServiceLifecycle;
use crate::protocol::{ClientArg, EventArgs, SubscribeArg, PUBLISH_SERVICE, REGISTER_SERVICE};
use crate::rpc::{RpcClient, RpcClientConfig, RpcError, RpcServer};

/// Handler that records every argument list it receives.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<EventArgs>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EventArgs> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn as_handler(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, args: Arc<EventArgs>) -> BoxFuture<'static, BusResult<()>> {
        self.calls.lock().unwrap().push((*args).clone());
        Box::pin(async { Ok(()) })
    }
}

/// Handler that always fails, counting attempts.
#[derive(Clone, Default)]
pub struct FailingHandler {
    attempts: Arc<AtomicUsize>,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl EventHandler for FailingHandler {
    fn handle(&self, _args: Arc<EventArgs>) -> BoxFuture<'static, BusResult<()>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(BusError::Handler("intentional failure".to_string())) })
    }
}

/// Reserve a loopback address with a free port.
///
/// The temporary listener is dropped before returning, so a parallel test could in
/// principle grab the same port; in practice the OS does not recycle it that fast.
pub fn free_local_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Routing path used by [`StubBroker`].
pub const STUB_BROKER_PATH: &str = "/_server_bus_";

/// How a [`StubBroker`] answers registrations.
#[derive(Debug, Clone, Copy)]
pub enum StubReply {
    Accept,
    Decline,
    Fail,
}

/// Broker stand-in that records registration requests and answers with a fixed reply.
pub struct StubBroker {
    lifecycle: ServiceLifecycle,
    address: String,
    requests: Arc<Mutex<Vec<SubscribeArg>>>,
}

impl StubBroker {
    pub async fn start(reply: StubReply) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let server = RpcServer::new().register(REGISTER_SERVICE, move |arg: SubscribeArg| {
            recorded.lock().unwrap().push(arg);
            async move {
                match reply {
                    StubReply::Accept => Ok(true),
                    StubReply::Decline => Ok(false),
                    StubReply::Fail => Err(RpcError::Remote("stub broker fault".to_string())),
                }
            }
        });

        let lifecycle = ServiceLifecycle::new("stub-broker");
        let address = lifecycle
            .start("127.0.0.1:0", server.router(STUB_BROKER_PATH))
            .await
            .unwrap()
            .to_string();

        Self {
            lifecycle,
            address,
            requests,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn requests(&self) -> Vec<SubscribeArg> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn stop(&self) {
        self.lifecycle.stop().await;
    }
}

/// Push one event to a callback service over HTTP, as a broker would.
pub async fn push_event(address: &str, path: &str, topic: &str, args: EventArgs) -> bool {
    let client = RpcClient::dial(address, path, &RpcClientConfig::default())
        .await
        .unwrap();
    let accepted = client
        .call(
            PUBLISH_SERVICE,
            &ClientArg {
                topic: topic.to_string(),
                args,
            },
        )
        .await
        .unwrap();
    client.close();
    accepted
}
