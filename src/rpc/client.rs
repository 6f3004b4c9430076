//! Outbound side of the RPC substrate.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{normalize_path, RpcClientConfig, RpcError, RpcRequest, RpcResponse};

/// Connection to one remote RPC service.
///
/// Created by [`RpcClient::dial`], which fails fast when the peer is unreachable
/// or does not serve the requested path.
pub struct RpcClient {
    client: Client,
    url: String,
}

impl RpcClient {
    /// Connect to the service mounted at `path` on `address` (`host:port`).
    pub async fn dial(
        address: &str,
        path: &str,
        config: &RpcClientConfig,
    ) -> Result<Self, RpcError> {
        Self::dial_with(config.http_client()?, address, path).await
    }

    /// Like [`RpcClient::dial`], reusing an HTTP client built by
    /// [`RpcClientConfig::http_client`].
    pub async fn dial_with(client: Client, address: &str, path: &str) -> Result<Self, RpcError> {
        let path = normalize_path(path);
        let url = format!("http://{}{}", address, path);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|source| RpcError::Connection {
                address: address.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Handshake {
                address: address.to_string(),
                path,
                status: status.as_u16(),
            });
        }

        debug!(url = %url, "Dialed RPC service");
        Ok(Self { client, url })
    }

    /// Invoke `method` and wait for its reply.
    pub async fn call<A, R>(&self, method: &str, params: &A) -> Result<R, RpcError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }

        let reply: RpcResponse = response.json().await?;
        if let Some(error) = reply.error {
            return Err(RpcError::Remote(error));
        }

        Ok(serde_json::from_value(reply.result)?)
    }

    /// Release the connection.
    pub fn close(self) {
        debug!(url = %self.url, "Closed RPC connection");
    }
}
