//! Busbridge - remote subscriptions for a local event bus
//!
//! Lets a process subscribe to topics published on another process's
//! in-memory event bus. The subscribing [`Client`] registers with a remote
//! [`Server`] (the broker); the broker then pushes every matching publish back
//! to the client's callback service, which republishes it on the client's own
//! bus.
//!
//! ```text
//! Client ──(ServerService.Register)──▶ Server
//! Server ──(ClientService.PushEvent)──▶ Client ──▶ local bus ──▶ handler
//! ```

pub mod bus;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod rpc;
pub mod server;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use bus::{handler_fn, EventBus, EventHandler, LocalBus, PublishResult};
pub use client::{Client, ClientError, Registration};
pub use config::Config;
pub use protocol::{EventArgs, SubscribeArg, SubscribeType};
pub use server::{Server, ServerError, ServerOptions};
