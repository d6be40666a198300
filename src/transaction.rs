//! Canonical in-memory transaction record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Signed,
    Rejected,
}

/// Which signing scheme the hardware wallet will apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransactionKind {
    /// Multisig Safe transaction signed off-chain via EIP-712.
    Safe {
        /// Owner that initiated signing, distinct from the Safe itself.
        #[serde(rename = "originalSigner")]
        original_signer: String,
    },
    /// Externally owned account signing an EIP-1559 transaction.
    Eoa,
}

/// Every quantity is `0x`-prefixed lowercase hex without leading zeros,
/// every address is lowercase 20-byte hex and `data` is even-length hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    kind: TransactionKind,
    pub chain_id: String,
    /// For Safe transactions this is the Safe contract address.
    pub from: String,
    pub to: String,
    pub value: String,
    pub data: String,
    pub gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub nonce: String,
}

impl Transaction {
    /// A pending transaction with zeroed fields. The kind is fixed here.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, kind: TransactionKind) -> Self {
        Self {
            id: id.into(),
            status: TransactionStatus::Pending,
            created_at,
            kind,
            chain_id: "0x1".into(),
            from: ZERO_ADDRESS.into(),
            to: ZERO_ADDRESS.into(),
            value: "0x0".into(),
            data: "0x".into(),
            gas: "0x0".into(),
            max_fee_per_gas: "0x0".into(),
            max_priority_fee_per_gas: "0x0".into(),
            nonce: "0x0".into(),
        }
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_safe(&self) -> bool {
        matches!(self.kind, TransactionKind::Safe { .. })
    }

    pub fn original_signer(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::Safe { original_signer } => Some(original_signer),
            TransactionKind::Eoa => None,
        }
    }

    /// First four bytes of calldata as lowercase hex, if present.
    pub fn selector(&self) -> Option<&str> {
        (self.data.len() >= 10).then(|| &self.data[..10])
    }

    /// Returns false when the transaction was already settled.
    pub fn mark_signed(&mut self) -> bool {
        self.transition(TransactionStatus::Signed)
    }

    pub fn mark_rejected(&mut self) -> bool {
        self.transition(TransactionStatus::Rejected)
    }

    fn transition(&mut self, next: TransactionStatus) -> bool {
        if self.status != TransactionStatus::Pending {
            return false;
        }
        self.status = next;
        true
    }
}
