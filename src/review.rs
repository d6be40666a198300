//! One review session: decrypt, normalize, then hash and simulate side by
//! side.
//!
//! Hashing is local and a failure there ends the session. Simulation goes
//! over the network and its failures are folded into the outcome so the
//! hashes stay visible.

use crate::cipher::PayloadCipher;
use crate::error::{ReviewError, SimulationError};
use crate::events::{EventInterpreter, SimulationResult};
use crate::hash::{HashEngine, TransactionHashes};
use crate::normalizer::{RelayRequest, TransactionNormalizer};
use crate::simulation::SimulationBackend;
use crate::transaction::Transaction;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// ── Session tokens ──────────────────────────────────────────────

/// Identifies one review request. Only the newest token is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(u64);

#[derive(Debug, Default)]
pub struct SessionTracker {
    current: AtomicU64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session, making every earlier token stale.
    pub fn begin(&self) -> SessionToken {
        SessionToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Marks everything in flight as stale, e.g. when the user leaves.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, token: SessionToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }

    /// Hands back `value` only if `token` is still current.
    pub fn accept<T>(&self, token: SessionToken, value: T) -> Option<T> {
        if self.is_current(token) {
            Some(value)
        } else {
            info!(session = token.0, "Discarding result of stale review session");
            None
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SimulationOutcome {
    Completed(SimulationResult),
    /// Nothing in the trace touched the signer's assets.
    NoChanges { message: String },
    Failed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
        retryable: bool,
    },
}

impl SimulationOutcome {
    fn from_error(error: SimulationError) -> Self {
        let retryable = error.is_retryable();
        let code = error.code();
        let no_changes = matches!(error, SimulationError::NoChanges);
        let message = ReviewError::from(error).user_message();
        if no_changes {
            SimulationOutcome::NoChanges { message }
        } else {
            SimulationOutcome::Failed {
                message,
                code,
                retryable,
            }
        }
    }

    pub fn result(&self) -> Option<&SimulationResult> {
        match self {
            SimulationOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub transaction: Transaction,
    pub hashes: TransactionHashes,
    pub simulation: SimulationOutcome,
}

// ── Reviewer ────────────────────────────────────────────────────

pub struct Reviewer {
    cipher: PayloadCipher,
    normalizer: TransactionNormalizer,
    hash_engine: HashEngine,
    simulator: Arc<dyn SimulationBackend>,
    interpreter: EventInterpreter,
    sessions: SessionTracker,
}

impl Reviewer {
    pub fn new(
        cipher: PayloadCipher,
        normalizer: TransactionNormalizer,
        hash_engine: HashEngine,
        simulator: Arc<dyn SimulationBackend>,
        interpreter: EventInterpreter,
    ) -> Self {
        Self {
            cipher,
            normalizer,
            hash_engine,
            simulator,
            interpreter,
            sessions: SessionTracker::new(),
        }
    }

    pub fn cipher(&self) -> &PayloadCipher {
        &self.cipher
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Reviews `request` as the newest session. Returns `None` if another
    /// review started (or the session was invalidated) before this one
    /// finished.
    pub async fn review_latest(
        &self,
        request: &RelayRequest,
    ) -> Option<Result<ReviewOutcome, ReviewError>> {
        let token = self.sessions.begin();
        let result = self.review(request).await;
        self.sessions.accept(token, result)
    }

    pub async fn review(&self, request: &RelayRequest) -> Result<ReviewOutcome, ReviewError> {
        let result = self.run(request).await;
        if let Err(e) = &result {
            warn!(tx_id = %request.request_id, kind = e.kind(), error = %e, "Review failed");
        }
        result
    }

    async fn run(&self, request: &RelayRequest) -> Result<ReviewOutcome, ReviewError> {
        let payload = self.cipher.open(&request.content)?;
        let tx = self.normalizer.normalize_request(request, payload)?;
        self.review_transaction(tx).await
    }

    pub async fn review_transaction(&self, tx: Transaction) -> Result<ReviewOutcome, ReviewError> {
        let (hashes, simulation) =
            tokio::join!(async { self.hash_engine.compute(&tx) }, self.simulate(&tx));
        let hashes = hashes?;

        info!(
            tx_id = %tx.id,
            simulated = simulation.result().is_some(),
            "Review ready"
        );
        Ok(ReviewOutcome {
            transaction: tx,
            hashes,
            simulation,
        })
    }

    async fn simulate(&self, tx: &Transaction) -> SimulationOutcome {
        let interpreted = match self.simulator.simulate(tx).await {
            Ok(call) => self.interpreter.interpret(tx, &call).await,
            Err(e) => Err(e),
        };
        match interpreted {
            Ok(result) => SimulationOutcome::Completed(result),
            Err(e) => SimulationOutcome::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{KeySlot, SymmetricKey};
    use crate::events::TRANSFER_TOPIC;
    use crate::normalizer::RequestType;
    use crate::tokens::StaticSource;
    use crate::transaction::TransactionKind;
    use crate::types::{CallResult, EthereumLog};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    const SIGNER: &str = "0x8ce19266498acc8ce67e8d33ae479ce7932a9fe6";

    /// Replays a fixed call result, or fails as an unreachable node.
    enum FixedBackend {
        Call(CallResult),
        Unreachable,
    }

    #[async_trait]
    impl SimulationBackend for FixedBackend {
        async fn simulate(&self, _tx: &Transaction) -> Result<CallResult, SimulationError> {
            match self {
                FixedBackend::Call(call) => Ok(call.clone()),
                FixedBackend::Unreachable => Err(SimulationError::Request {
                    message: "connection refused".into(),
                    code: None,
                    call_content: json!({}),
                }),
            }
        }
    }

    fn reviewer(backend: FixedBackend, slot: Arc<KeySlot>) -> Reviewer {
        Reviewer::new(
            PayloadCipher::new(slot),
            TransactionNormalizer::default(),
            HashEngine::default(),
            Arc::new(backend),
            EventInterpreter::new(Arc::new(StaticSource::new())),
        )
    }

    fn eoa_tx() -> Transaction {
        let mut tx = Transaction::new("req-1", Utc::now(), TransactionKind::Eoa);
        tx.from = SIGNER.into();
        tx.to = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045".into();
        tx.gas = "0x5208".into();
        tx.max_fee_per_gas = "0x3b9aca00".into();
        tx.max_priority_fee_per_gas = "0x3b9aca00".into();
        tx
    }

    fn incoming_transfer() -> CallResult {
        CallResult {
            status: "0x1".into(),
            logs: vec![EthereumLog {
                address: "0x6b175474e89094c44da98b954eedeac495271d0f".into(),
                topics: vec![
                    TRANSFER_TOPIC.into(),
                    format!("0x{:0>64}", "d8da6bf26964af9d7eed9e03e53415d37aa96045"),
                    format!("0x{:0>64}", &SIGNER[2..]),
                ],
                data: format!("0x{:064x}", 1_000_000_000_000_000_000u64),
                block_number: None,
                transaction_hash: None,
                log_index: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_newer_session_makes_older_stale() {
        let tracker = SessionTracker::new();
        let first = tracker.begin();
        let second = tracker.begin();
        assert_eq!(tracker.accept(first, 1), None);
        assert_eq!(tracker.accept(second, 2), Some(2));
        tracker.invalidate();
        assert!(!tracker.is_current(second));
    }

    #[tokio::test]
    async fn test_review_transaction_combines_hashes_and_changes() {
        let reviewer = reviewer(FixedBackend::Call(incoming_transfer()), Arc::default());
        let outcome = reviewer.review_transaction(eoa_tx()).await.unwrap();

        assert!(matches!(outcome.hashes, TransactionHashes::Eoa(_)));
        let result = outcome.simulation.result().unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].amount, "1.0");
        assert!(result.changes[0].warning.is_some());
    }

    #[tokio::test]
    async fn test_simulation_failure_keeps_hashes() {
        let outcome = reviewer(FixedBackend::Unreachable, Arc::default())
            .review_transaction(eoa_tx())
            .await
            .unwrap();
        assert!(matches!(outcome.hashes, TransactionHashes::Eoa(_)));
        assert!(matches!(outcome.simulation, SimulationOutcome::Failed { retryable: true, .. }));
    }

    #[tokio::test]
    async fn test_empty_trace_is_no_changes() {
        let outcome = reviewer(FixedBackend::Call(CallResult::default()), Arc::default())
            .review_transaction(eoa_tx())
            .await
            .unwrap();
        let json = serde_json::to_value(&outcome.simulation).unwrap();
        assert_eq!(json["status"], "no_changes");
    }

    #[tokio::test]
    async fn test_unpaired_device_cannot_review() {
        let request = RelayRequest {
            request_id: "req-9".into(),
            request_type: RequestType::Eip712,
            content: "AAAA".into(),
            from_device: String::new(),
            creation_date: "2025-03-01T12:00:00Z".into(),
        };
        let slot = Arc::new(KeySlot::new());
        let reviewer = reviewer(FixedBackend::Call(CallResult::default()), slot.clone());
        let err = reviewer.review(&request).await.unwrap_err();
        assert_eq!(err.kind(), "decryption");

        slot.install(SymmetricKey::from_bytes(&[7u8; 16]).unwrap());
        let err = reviewer.review(&request).await.unwrap_err();
        assert_eq!(err.kind(), "decryption");
    }

    #[tokio::test]
    async fn test_review_latest_returns_current_result() {
        let reviewer = reviewer(FixedBackend::Call(CallResult::default()), Arc::default());
        let request = RelayRequest {
            request_id: "req-10".into(),
            request_type: RequestType::EoaTransaction,
            content: "AAAA".into(),
            from_device: String::new(),
            creation_date: "0".into(),
        };
        let result = reviewer.review_latest(&request).await;
        assert!(matches!(result, Some(Err(_))));
    }
}
