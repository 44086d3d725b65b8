//! HTTP transport for `league.v2` JSON-RPC calls.
//!
//! `TransportClient` is the outbound half: every agent (Player, Referee,
//! League Manager) uses one to call a peer's `/mcp` endpoint and get back a
//! decoded `league.v2` payload. `RpcHandler` is the inbound half: whatever
//! an agent implements to answer calls made to its own `/mcp` endpoint,
//! independent of whether that endpoint is mounted behind axum (the
//! `server` feature) or driven directly in a test harness.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::{ErrorCode, JsonRpcRequest, JsonRpcResponse};
use crate::http_pool::pooled_client;

#[derive(Debug)]
pub enum TransportError {
    /// The underlying HTTP call failed (connection refused, DNS, timeout).
    Http(String),
    /// The call exceeded the caller-supplied deadline.
    Timeout,
    /// The peer answered with a well-formed JSON-RPC error.
    Rpc { code: i64, message: String },
    /// The peer's response body did not decode into the expected payload.
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Http(msg) => write!(f, "transport error: {msg}"),
            TransportError::Timeout => write!(f, "transport error: call timed out"),
            TransportError::Rpc { code, message } => {
                write!(f, "peer returned rpc error {code}: {message}")
            }
            TransportError::Decode(msg) => write!(f, "failed to decode peer response: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Header carrying a peer's `AuthToken` on every call outside registration.
pub const AUTH_HEADER: &str = "x-league-auth-token";

/// Outbound JSON-RPC client bound to one peer endpoint, backed by a pooled
/// `reqwest::Client` (see [`crate::http_pool`]).
#[derive(Clone)]
pub struct TransportClient {
    endpoint: String,
}

impl TransportClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issues one unauthenticated `tools/call` (registration only; every
    /// other message type must use [`TransportClient::call_authenticated`]).
    pub async fn call<T, R>(
        &self,
        tool: &str,
        arguments: &T,
        deadline: Duration,
    ) -> Result<R, TransportError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_token(tool, arguments, deadline, None).await
    }

    /// Issues one `tools/call` carrying `auth_token` in the dedicated
    /// header field.
    pub async fn call_authenticated<T, R>(
        &self,
        tool: &str,
        arguments: &T,
        deadline: Duration,
        auth_token: &str,
    ) -> Result<R, TransportError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_token(tool, arguments, deadline, Some(auth_token)).await
    }

    async fn call_with_token<T, R>(
        &self,
        tool: &str,
        arguments: &T,
        deadline: Duration,
        auth_token: Option<&str>,
    ) -> Result<R, TransportError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let arguments = serde_json::to_value(arguments)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let request = JsonRpcRequest::new(Uuid::new_v4().to_string(), tool, arguments);

        let client = pooled_client(&base_url(&self.endpoint));
        let mut builder = client.post(&self.endpoint).json(&request);
        if let Some(token) = auth_token {
            builder = builder.header(AUTH_HEADER, token);
        }

        let response = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let result = body
            .result
            .ok_or_else(|| TransportError::Decode("response carried neither result nor error".into()))?;

        serde_json::from_value(result).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn base_url(endpoint: &str) -> String {
    match reqwest::Url::parse(endpoint) {
        Ok(url) => format!(
            "{}://{}",
            url.scheme(),
            url.host_str()
                .map(|h| match url.port() {
                    Some(p) => format!("{h}:{p}"),
                    None => h.to_string(),
                })
                .unwrap_or_default()
        ),
        Err(_) => endpoint.to_string(),
    }
}

/// Inbound side of the protocol: something that can answer one `tools/call`
/// dispatch, independent of how it is wired to an HTTP listener. Every
/// agent (`PlayerAgent`, `RefereeAgent`, `LeagueManager`) implements this so
/// it can be mounted behind [`crate::server`] or driven directly in tests.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handles one decoded `tools/call`, returning the JSON value to place
    /// in the response's `result` field, or a `league.v2` error code plus
    /// message to place in its `error` field. `auth_token` is whatever the
    /// caller sent in the [`AUTH_HEADER`] header, if any; registration
    /// calls are the only ones expected to omit it.
    async fn handle_call(
        &self,
        tool: &str,
        auth_token: Option<&str>,
        arguments: Value,
    ) -> Result<Value, (ErrorCode, String)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_path_and_keeps_port() {
        assert_eq!(base_url("http://127.0.0.1:8101/mcp"), "http://127.0.0.1:8101");
        assert_eq!(base_url("https://example.com/mcp"), "https://example.com");
    }

    #[test]
    fn transport_error_display_is_informative() {
        let err = TransportError::Rpc {
            code: 40007,
            message: "unknown match".into(),
        };
        assert!(err.to_string().contains("40007"));
        assert!(err.to_string().contains("unknown match"));
    }
}
