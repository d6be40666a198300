//! End-to-end review of a relayed Safe batch: decrypt, normalize, hash and
//! simulate against a local JSON-RPC node.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use txverify::api::{build_router, AppState};
use txverify::cipher::{KeySlot, PayloadCipher, SymmetricKey};
use txverify::config::RpcEndpoints;
use txverify::events::{EventInterpreter, TRANSFER_TOPIC};
use txverify::hash::{HashEngine, TransactionHashes};
use txverify::normalizer::{RelayRequest, RequestType, TransactionNormalizer};
use txverify::relay::RelayClient;
use txverify::review::SimulationOutcome;
use txverify::rpc::RpcClient;
use txverify::simulation::SimulationGateway;
use txverify::tokens::{StaticSource, TokenInfo};
use txverify::types::{JsonRpcRequest, JsonRpcResponse};
use txverify::Reviewer;

const ENVELOPE: &str = include_str!("fixtures/relayed_envelope.b64");
const PAIRING_KEY: &str = "4trOeNw6slzIgcVapSGvn95AjnPNreH9z0W9ht9KVJY";

const SAFE: &str = "0x676ad4839a3cbb3739000153e4802bf4ce6aef3f";
const OWNER: &str = "0x8ce19266498acc8ce67e8d33ae479ce7932a9fe6";
const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const RECIPIENT: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

const DOMAIN_HASH: &str = "0xbad9d06d85fadefbd07bb495b117907ee5ea67b28d46ad772c24e755d0c02412";
const MESSAGE_HASH: &str = "0x1e9a071732b76a8a774a7faa2f2492b2d93fa2ac70794ffab0d20049ac4903f2";
const SAFE_TX_HASH: &str = "0x775b12ecb4d7ad9bfdb7bb46767935cd6c4eac3f0c3a84a47b5f40e0d8efd184";

type Seen = Arc<Mutex<Vec<JsonRpcRequest>>>;

fn topic(address: &str) -> String {
    format!("0x{:0>64}", &address[2..])
}

/// A node whose simulated block moves 2.5 USDC out of the Safe.
async fn spawn_node(seen: Seen) -> String {
    let router = Router::new()
        .route(
            "/",
            post(|State(seen): State<Seen>, Json(req): Json<JsonRpcRequest>| async move {
                let id = req.id.clone();
                seen.lock().unwrap().push(req);
                Json(JsonRpcResponse::result(
                    id,
                    json!([{
                        "number": "0x1",
                        "calls": [{
                            "status": "0x1",
                            "gasUsed": "0x1d4c0",
                            "logs": [{
                                "address": USDC,
                                "topics": [TRANSFER_TOPIC, topic(SAFE), topic(RECIPIENT)],
                                "data": format!("0x{:064x}", 2_500_000u64),
                            }]
                        }]
                    }]),
                ))
            }),
        )
        .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn usdc() -> TokenInfo {
    TokenInfo {
        chain_id: "0x1".into(),
        address: USDC.into(),
        name: "USD Coin".into(),
        symbol: "USDC".into(),
        decimals: 6,
        icon: None,
        warning: None,
    }
}

fn reviewer(node_url: &str, slot: Arc<KeySlot>) -> Reviewer {
    Reviewer::new(
        PayloadCipher::new(slot),
        TransactionNormalizer::default(),
        HashEngine::default(),
        Arc::new(SimulationGateway::new(RpcClient::default(), RpcEndpoints::new(node_url))),
        EventInterpreter::new(Arc::new(StaticSource::new().with_token(usdc()))),
    )
}

fn paired_slot() -> Arc<KeySlot> {
    let slot = Arc::new(KeySlot::new());
    slot.install(SymmetricKey::from_base64(PAIRING_KEY).unwrap());
    slot
}

fn relay_request() -> RelayRequest {
    RelayRequest {
        request_id: "a4f0c3e2-batch".into(),
        request_type: RequestType::Eip712,
        content: ENVELOPE.trim().to_string(),
        from_device: "extension".into(),
        creation_date: "2025-03-01T12:00:00Z".into(),
    }
}

#[tokio::test]
async fn test_safe_batch_review_end_to_end() {
    let seen: Seen = Arc::default();
    let url = spawn_node(seen.clone()).await;
    let outcome = reviewer(&url, paired_slot()).review(&relay_request()).await.unwrap();

    let tx = &outcome.transaction;
    assert!(tx.is_safe());
    assert_eq!(tx.from, SAFE);
    assert_eq!(tx.original_signer(), Some(OWNER));
    assert_eq!(tx.nonce, "0x2c");
    assert_eq!(tx.gas, "0x1e8480");
    assert!(tx.data.starts_with("0x8d80ff0a"));

    match &outcome.hashes {
        TransactionHashes::Safe(hashes) => {
            assert_eq!(hashes.operation, 1);
            assert_eq!(hashes.domain_hash, DOMAIN_HASH);
            assert_eq!(hashes.message_hash, MESSAGE_HASH);
            assert_eq!(hashes.safe_tx_hash, SAFE_TX_HASH);
        }
        other => panic!("expected Safe hashes, got {other:?}"),
    }

    let result = match &outcome.simulation {
        SimulationOutcome::Completed(result) => result,
        other => panic!("expected completed simulation, got {other:?}"),
    };
    assert_eq!(result.changes.len(), 1);
    let change = &result.changes[0];
    assert_eq!(change.symbol, "USDC");
    assert_eq!(change.amount, "2.5");
    assert_eq!(serde_json::to_value(change).unwrap()["direction"], "decrease");
    assert!(change.warning.is_none());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let params = &seen[0].params[0];
    let call = &params["blockStateCalls"][0]["calls"][0];
    assert_eq!(params["validation"], false);
    assert_eq!(call["to"], SAFE);
    assert!(call["data"].as_str().unwrap().starts_with("0x9fe83978"));
    assert!(params["blockStateCalls"][0]["stateOverrides"][SAFE]["code"].is_string());
}

#[tokio::test]
async fn test_wrong_key_fails_before_simulating() {
    let seen: Seen = Arc::default();
    let url = spawn_node(seen.clone()).await;
    let slot = Arc::new(KeySlot::new());
    slot.install(SymmetricKey::from_bytes(&[9u8; 32]).unwrap());

    let err = reviewer(&url, slot).review(&relay_request()).await.unwrap_err();
    assert_eq!(err.kind(), "decryption");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_review_endpoint_returns_outcome() {
    let url = spawn_node(Arc::default()).await;
    let state = Arc::new(AppState {
        reviewer: reviewer(&url, paired_slot()),
        relay: RelayClient::new(reqwest::Client::new(), "http://127.0.0.1:9", None),
    });

    let body = serde_json::to_string(&relay_request()).unwrap();
    let resp = build_router(state)
        .oneshot(
            Request::post("/review")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["hashes"]["kind"], "safe");
    assert_eq!(json["hashes"]["safeTxHash"], SAFE_TX_HASH);
    assert_eq!(json["transaction"]["originalSigner"], OWNER);
    assert_eq!(json["simulation"]["status"], "completed");
    assert_eq!(json["simulation"]["changes"][0]["amount"], "2.5");
}
