//! Wire contract shared by clients and brokers.
//!
//! Two remote procedures make up the protocol:
//! - `ServerService.Register` (client → broker): asks the broker to deliver a topic
//!   to the caller's callback procedure.
//! - `ClientService.PushEvent` (broker → client): delivers one event occurrence.
//!
//! The procedure names are part of the interface. A broker calls back on whatever
//! name the client sent in [`SubscribeArg::callback_procedure`], and clients built
//! from this crate always send [`PUBLISH_SERVICE`].

use serde::{Deserialize, Serialize};

/// Callback procedure exposed by every client.
pub const PUBLISH_SERVICE: &str = "ClientService.PushEvent";

/// Registration procedure exposed by every broker.
pub const REGISTER_SERVICE: &str = "ServerService.Register";

/// Ordered sequence of opaque event arguments.
///
/// Handlers on the same topic are expected to agree on the shape; nothing is
/// enforced at this layer.
pub type EventArgs = Vec<serde_json::Value>;

/// How long a broker keeps a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeType {
    /// Deliver every future occurrence of the topic.
    #[default]
    Permanent,
    /// Deliver only the next occurrence. The broker drops the registration after it.
    Once,
}

impl std::fmt::Display for SubscribeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscribeType::Permanent => f.write_str("permanent"),
            SubscribeType::Once => f.write_str("once"),
        }
    }
}

/// Registration request sent from a client to a broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeArg {
    /// Address the broker dials to reach the caller's callback service.
    pub caller_address: String,
    /// Routing path of the caller's callback service.
    pub caller_path: String,
    /// Procedure the broker calls to push events.
    pub callback_procedure: String,
    pub mode: SubscribeType,
    pub topic: String,
}

/// Event payload pushed from a broker to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientArg {
    pub topic: String,
    #[serde(default)]
    pub args: EventArgs,
}
