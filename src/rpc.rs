//! Thin JSON-RPC 2.0 client over `reqwest`.

use crate::error::TransportError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn call(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.send(url, &JsonRpcRequest::new(method, params)).await
    }

    /// Posts `req` and parses the envelope. A JSON-RPC `error` member is
    /// returned as-is; only connection, HTTP status and body-parse failures
    /// are errors here.
    pub async fn send(
        &self,
        url: &str,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        debug!(method = %req.method, "Sending JSON-RPC request");
        let resp = self.http.post(url).json(req).send().await.map_err(|e| {
            warn!(method = %req.method, error = %e, "JSON-RPC connection error");
            TransportError {
                message: format!("connection error: {e}"),
                status: None,
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            warn!(
                method = %req.method,
                status = status.as_u16(),
                "JSON-RPC endpoint returned non-success status"
            );
            return Err(TransportError {
                message: format!("request failed with status {status}"),
                status: Some(status.as_u16()),
            });
        }

        resp.json::<JsonRpcResponse>().await.map_err(|e| TransportError {
            message: format!("unparseable response: {e}"),
            status: Some(status.as_u16()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let url = serve(Router::new().route(
            "/",
            post(|Json(req): Json<JsonRpcRequest>| async move {
                Json(JsonRpcResponse::result(req.id, json!(req.method)))
            }),
        ))
        .await;

        let resp = RpcClient::default().call(&url, "eth_chainId", json!([])).await.unwrap();
        assert_eq!(resp.result, Some(json!("eth_chainId")));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_jsonrpc_error_is_not_transport_error() {
        let router = Router::new().route(
            "/",
            post(|| async {
                Json(JsonRpcResponse::error(json!(1), -32601, "method not found".into()))
            }),
        );
        let url = serve(router).await;

        let resp = RpcClient::default().call(&url, "eth_nope", json!([])).await.unwrap();
        assert_eq!(resp.error.unwrap().code, Some(-32601));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let url = serve(Router::new().route("/", post(|| async { StatusCode::BAD_GATEWAY }))).await;

        let err = RpcClient::default().call(&url, "eth_chainId", json!([])).await.unwrap_err();
        assert_eq!(err.status, Some(502));
    }
}
