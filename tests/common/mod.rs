//! Shared utilities for integration tests.

use std::sync::Arc;

use tokio::sync::mpsc;

use busbridge::{handler_fn, Config, EventArgs, EventHandler, LocalBus, Server};

/// Reserve a loopback address with a free port.
pub fn free_local_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Config with both services on distinct free loopback ports.
pub fn test_config() -> Config {
    Config::for_test()
}

/// Handler forwarding every delivery into a channel.
pub fn channel_handler() -> (Arc<dyn EventHandler>, mpsc::UnboundedReceiver<EventArgs>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |args: Arc<EventArgs>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((*args).clone());
            Ok(())
        }
    });
    (handler, rx)
}

/// Drain everything delivered so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<EventArgs>) -> Vec<EventArgs> {
    let mut out = Vec::new();
    while let Ok(args) = rx.try_recv() {
        out.push(args);
    }
    out
}

pub async fn start_server(config: &Config) -> Server {
    let server = Server::from_config(config, Arc::new(LocalBus::new()));
    server.start().await.unwrap();
    server
}
