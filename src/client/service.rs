//! Callback service: the inbound half of a client.

use std::sync::Arc;

use tracing::debug;

use crate::bus::EventBus;
use crate::protocol::{ClientArg, PUBLISH_SERVICE};
use crate::rpc::RpcServer;

/// Receives events pushed by brokers and republishes them on the local bus.
pub struct ClientService {
    bus: Arc<dyn EventBus>,
}

impl ClientService {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Handle one pushed event.
    ///
    /// Always accepts. A topic without local handlers is a silent no-op.
    pub async fn push_event(&self, arg: ClientArg) -> bool {
        let ClientArg { topic, args } = arg;
        let result = self.bus.publish(&topic, args).await;
        debug!(
            topic = %topic,
            handled = result.handled,
            failed = result.failed,
            "Remote event republished"
        );
        true
    }

    /// RPC registry exposing [`PUBLISH_SERVICE`].
    pub fn rpc_server(self: Arc<Self>) -> RpcServer {
        RpcServer::new().register(PUBLISH_SERVICE, move |arg: ClientArg| {
            let service = Arc::clone(&self);
            async move { Ok(service.push_event(arg).await) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::rpc::RpcRequest;
    use crate::test_utils::RecordingHandler;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_event_republishes() {
        let bus = Arc::new(LocalBus::new());
        let handler = RecordingHandler::new();
        bus.subscribe("orders", handler.as_handler()).await;
        let service = ClientService::new(bus);

        let accepted = service
            .push_event(ClientArg {
                topic: "orders".to_string(),
                args: vec![json!("created"), json!(7)],
            })
            .await;

        assert!(accepted);
        assert_eq!(handler.calls(), vec![vec![json!("created"), json!(7)]]);
    }

    #[tokio::test]
    async fn test_push_event_without_handler_still_accepts() {
        let service = ClientService::new(Arc::new(LocalBus::new()));

        let accepted = service
            .push_event(ClientArg {
                topic: "nobody-listens".to_string(),
                args: vec![],
            })
            .await;

        assert!(accepted);
    }

    #[tokio::test]
    async fn test_rpc_server_exposes_push_event() {
        let bus = Arc::new(LocalBus::new());
        let handler = RecordingHandler::new();
        bus.subscribe("orders", handler.as_handler()).await;
        let server = Arc::new(ClientService::new(bus)).rpc_server();

        assert_eq!(server.methods(), vec![PUBLISH_SERVICE.to_string()]);

        let response = server
            .dispatch(RpcRequest {
                method: PUBLISH_SERVICE.to_string(),
                params: json!({ "topic": "orders", "args": [1, 2] }),
            })
            .await;

        assert_eq!(response.result, json!(true));
        assert_eq!(handler.calls(), vec![vec![json!(1), json!(2)]]);
    }
}
