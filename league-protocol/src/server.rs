//! Axum HTTP mount for an [`RpcHandler`], feature-gated behind `server`.
//!
//! Every `league.v2` agent exposes exactly one route, `POST /mcp`, that
//! accepts a JSON-RPC `tools/call` envelope and dispatches it to whatever
//! [`RpcHandler`] the agent implements: a thin routing/serialization
//! layer that never inspects the payload itself.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;

use crate::envelope::{ErrorCode, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{RpcHandler, AUTH_HEADER};

#[derive(Clone)]
struct ServerState {
    handler: Arc<dyn RpcHandler>,
}

/// Binds `addr` and serves `handler`'s `/mcp` route until the returned
/// task is aborted or the process exits. Spawns onto the current Tokio
/// runtime and returns immediately with the join handle, the way the
/// teacher's adapter hands back control once the listener is bound rather
/// than blocking the caller on `serve()` directly.
pub async fn serve(
    addr: SocketAddr,
    handler: Arc<dyn RpcHandler>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let state = ServerState { handler };
    let app = Router::new()
        .route("/mcp", post(handle_mcp))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    log::info!("league.v2 agent listening on {local_addr}");

    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            log::error!("agent HTTP server exited: {err}");
        }
    }))
}

async fn handle_mcp(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    if request.method != "tools/call" {
        return Json(JsonRpcResponse::failure(
            Some(request.id),
            crate::envelope::JsonRpcError::new(
                ErrorCode::UnknownTool,
                format!("unsupported method '{}'", request.method),
            ),
        ));
    }

    let auth_token = headers
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok());

    let result = state
        .handler
        .handle_call(&request.params.name, auth_token, request.params.arguments)
        .await;

    match result {
        Ok(value) => Json(JsonRpcResponse::success(request.id, value)),
        Err((code, message)) => Json(JsonRpcResponse::failure(
            Some(request.id),
            crate::envelope::JsonRpcError::new(code, message),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoHandler;

    #[async_trait]
    impl RpcHandler for EchoHandler {
        async fn handle_call(
            &self,
            tool: &str,
            _auth_token: Option<&str>,
            arguments: Value,
        ) -> Result<Value, (ErrorCode, String)> {
            if tool == "fail.me" {
                return Err((ErrorCode::InvalidParams, "nope".into()));
            }
            Ok(json!({ "echoed": arguments }))
        }
    }

    #[tokio::test]
    async fn serves_and_answers_tools_call() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let handler: Arc<dyn RpcHandler> = Arc::new(EchoHandler);
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let state = ServerState { handler };
        let app = Router::new()
            .route("/mcp", post(handle_mcp))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let req = JsonRpcRequest::new("req-1", "player.register.request", json!({"x": 1}));
        let resp: JsonRpcResponse = client
            .post(format!("http://{bound}/mcp"))
            .json(&req)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(resp.result.unwrap()["echoed"]["x"], 1);
    }
}
