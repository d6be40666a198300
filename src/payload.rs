//! Raw payload shapes as they arrive from the relay, before normalization.
//!
//! The browser extension encodes numbers either as CBOR text (`"0x2c"`,
//! `"44"`) or as CBOR unsigned integers, so every numeric field is a
//! [`FieldValue`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Uint(u64),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Uint(n)
    }
}

/// Safe transaction proposed for off-chain EIP-712 signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712SafeTx {
    pub chain_id: FieldValue,
    pub safe_address: String,
    /// Owner that initiated the off-chain signing.
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_tx_gas: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_gas: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<FieldValue>,
}

/// Plain EIP-1559 transaction from an externally owned account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EoaTx {
    pub chain_id: FieldValue,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<FieldValue>,
}

/// Decrypted payload, discriminated by the presence of `safeAddress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    Safe(Eip712SafeTx),
    Eoa(EoaTx),
}

impl RawPayload {
    /// Key whose presence marks a Safe payload.
    pub const SAFE_DISCRIMINATOR: &'static str = "safeAddress";

    pub fn kind_name(&self) -> &'static str {
        match self {
            RawPayload::Safe(_) => "safe",
            RawPayload::Eoa(_) => "eoa",
        }
    }
}
