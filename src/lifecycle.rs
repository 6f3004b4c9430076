//! Start/stop state for a listening RPC service.
//!
//! Invariant: a listener is bound if and only if the state is `Started`.
//! `start` and `stop` are the only mutators and are serialized by a mutex, so a
//! second concurrent `start` observes the first one's result instead of racing it.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default time `stop` waits for in-flight calls to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from [`ServiceLifecycle::start`].
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("service already started")]
    AlreadyStarted,

    #[error("listen error on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

enum State {
    Stopped,
    Started(Running),
}

/// Lifecycle of one HTTP listener serving an RPC router.
pub struct ServiceLifecycle {
    name: &'static str,
    shutdown_timeout: Duration,
    state: Mutex<State>,
}

impl ServiceLifecycle {
    /// Create a stopped lifecycle. `name` labels log events.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: Mutex::new(State::Stopped),
        }
    }

    /// Set how long `stop` waits for in-flight calls.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind `address` and serve `router` on a background task.
    ///
    /// Fails with [`StartError::AlreadyStarted`] without touching the running
    /// listener when called twice.
    pub async fn start(&self, address: &str, router: Router) -> Result<SocketAddr, StartError> {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Started(_)) {
            warn!(service = self.name, "Start rejected, service already started");
            return Err(StartError::AlreadyStarted);
        }

        let bind_error = |source| StartError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let name = self.name;
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!(service = name, error = %e, "RPC server error");
            }
        });

        *state = State::Started(Running {
            local_addr,
            shutdown_tx,
            task,
        });

        info!(service = self.name, addr = %local_addr, "Service listening");
        Ok(local_addr)
    }

    /// Close the listener and wait for in-flight calls to drain.
    ///
    /// No-op when already stopped. Calls still running after the shutdown
    /// timeout are aborted.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, State::Stopped) {
            State::Started(running) => running,
            State::Stopped => return,
        };

        let Running {
            local_addr,
            shutdown_tx,
            mut task,
        } = running;
        let _ = shutdown_tx.send(());

        if tokio::time::timeout(self.shutdown_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(
                service = self.name,
                timeout = ?self.shutdown_timeout,
                "Service did not drain in time, aborting"
            );
            task.abort();
        }

        info!(service = self.name, addr = %local_addr, "Service stopped");
    }

    /// Whether a listener is currently bound.
    pub async fn is_started(&self) -> bool {
        matches!(*self.state.lock().await, State::Started(_))
    }

    /// Address the listener is bound to, when started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            State::Started(running) => Some(running.local_addr),
            State::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{RpcClient, RpcClientConfig, RpcServer};

    fn router() -> Router {
        RpcServer::new()
            .register("Test.Echo", |arg: String| async move { Ok(arg) })
            .router("/test")
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let lifecycle = ServiceLifecycle::new("test");
        assert!(!lifecycle.is_started().await);

        let addr = lifecycle.start("127.0.0.1:0", router()).await.unwrap();
        assert!(lifecycle.is_started().await);
        assert_eq!(lifecycle.local_addr().await, Some(addr));

        lifecycle.stop().await;
        assert!(!lifecycle.is_started().await);
        assert_eq!(lifecycle.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let lifecycle = ServiceLifecycle::new("test");
        let addr = lifecycle.start("127.0.0.1:0", router()).await.unwrap();

        let err = lifecycle.start("127.0.0.1:0", router()).await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyStarted));
        assert_eq!(lifecycle.local_addr().await, Some(addr));

        lifecycle.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_stopped() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = occupied.local_addr().unwrap().to_string();

        let lifecycle = ServiceLifecycle::new("test");
        let err = lifecycle.start(&address, router()).await.unwrap_err();

        assert!(matches!(err, StartError::Bind { .. }));
        assert!(!lifecycle.is_started().await);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let lifecycle = ServiceLifecycle::new("test");
        lifecycle.stop().await;
        lifecycle.stop().await;
        assert!(!lifecycle.is_started().await);
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let lifecycle = ServiceLifecycle::new("test");
        let addr = lifecycle.start("127.0.0.1:0", router()).await.unwrap();
        let config = RpcClientConfig::default();

        let client = RpcClient::dial(&addr.to_string(), "/test", &config)
            .await
            .unwrap();
        client.close();

        lifecycle.stop().await;

        let result = RpcClient::dial(&addr.to_string(), "/test", &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_restart_on_same_address() {
        let lifecycle = ServiceLifecycle::new("test");
        let addr = lifecycle.start("127.0.0.1:0", router()).await.unwrap();
        lifecycle.stop().await;

        let again = lifecycle
            .start(&addr.to_string(), router())
            .await
            .unwrap();
        assert_eq!(again, addr);

        lifecycle.stop().await;
    }
}
