//! Inbound side of the RPC substrate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::{normalize_path, Handshake, RpcError, RpcRequest, RpcResponse, HANDSHAKE_SERVICE};

type MethodFuture = BoxFuture<'static, Result<serde_json::Value, RpcError>>;
type Method = Arc<dyn Fn(serde_json::Value) -> MethodFuture + Send + Sync>;

/// Registry of named procedures, served over HTTP by [`RpcServer::router`].
///
/// Each inbound call runs on its own task, so procedures must tolerate
/// concurrent invocation.
#[derive(Default)]
pub struct RpcServer {
    methods: HashMap<String, Method>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure under `name` (conventionally `Service.Method`).
    pub fn register<A, R, F, Fut>(mut self, name: &str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let method: Method = Arc::new(
            move |params: serde_json::Value| -> MethodFuture {
                let f = Arc::clone(&f);
                Box::pin(async move {
                    let arg: A = serde_json::from_value(params)?;
                    let reply = (*f)(arg).await?;
                    Ok::<_, RpcError>(serde_json::to_value(reply)?)
                })
            },
        );
        self.methods.insert(name.to_string(), method);
        self
    }

    /// Names of the registered procedures, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run one call envelope against the registry.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let Some(method) = self.methods.get(&request.method) else {
            warn!(method = %request.method, "Unknown RPC method");
            return RpcResponse::err(RpcError::UnknownMethod(request.method));
        };

        match method(request.params).await {
            Ok(result) => RpcResponse::ok(result),
            Err(e) => {
                warn!(method = %request.method, error = %e, "RPC method failed");
                RpcResponse::err(e)
            }
        }
    }

    /// Build the axum router serving this registry at `path`.
    pub fn router(self, path: &str) -> Router {
        Router::new()
            .route(&normalize_path(path), get(handshake).post(invoke))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }
}

async fn handshake(State(server): State<Arc<RpcServer>>) -> Json<Handshake> {
    Json(Handshake {
        service: HANDSHAKE_SERVICE.to_string(),
        methods: server.methods(),
    })
}

async fn invoke(
    State(server): State<Arc<RpcServer>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    Json(server.dispatch(request).await)
}
