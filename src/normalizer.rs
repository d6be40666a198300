//! Turns a decoded relay payload into a canonical [`Transaction`].
//!
//! The relay is untrusted input. A malformed address is logged and replaced
//! by the zero address so the review flow can still show what it has;
//! malformed quantities and data are rejected.

use crate::error::PayloadValidationError;
use crate::payload::{Eip712SafeTx, EoaTx, FieldValue, RawPayload};
use crate::transaction::{Transaction, TransactionKind, ZERO_ADDRESS};

use alloy_primitives::{Address, U256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

/// Conservative gas limit used for Safe payloads, which carry none.
pub const DEFAULT_SAFE_GAS_LIMIT: &str = "0x1e8480";
/// 1 gwei, used for both fee fields of Safe payloads.
pub const DEFAULT_SAFE_FEE_PER_GAS: &str = "0x3b9aca00";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "eoa_transaction")]
    EoaTransaction,
    #[serde(rename = "eip712")]
    Eip712,
}

/// A pending request as listed by the relay backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub request_id: String,
    pub request_type: RequestType,
    /// Encrypted envelope.
    pub content: String,
    #[serde(default)]
    pub from_device: String,
    pub creation_date: String,
}

/// Gas and fee values substituted into Safe transactions.
#[derive(Debug, Clone)]
pub struct SafeGasDefaults {
    pub gas_limit: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

impl Default for SafeGasDefaults {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_SAFE_GAS_LIMIT.into(),
            max_fee_per_gas: DEFAULT_SAFE_FEE_PER_GAS.into(),
            max_priority_fee_per_gas: DEFAULT_SAFE_FEE_PER_GAS.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionNormalizer {
    safe_defaults: SafeGasDefaults,
}

impl TransactionNormalizer {
    pub fn new(safe_defaults: SafeGasDefaults) -> Self {
        Self { safe_defaults }
    }

    /// Normalizes a payload that came in through a relay request, checking
    /// that the declared request type agrees with the decoded shape.
    pub fn normalize_request(
        &self,
        request: &RelayRequest,
        payload: RawPayload,
    ) -> Result<Transaction, PayloadValidationError> {
        let consistent = matches!(
            (request.request_type, &payload),
            (RequestType::Eip712, RawPayload::Safe(_))
                | (RequestType::EoaTransaction, RawPayload::Eoa(_))
        );
        if !consistent {
            return Err(PayloadValidationError::KindMismatch {
                declared: format!("{:?}", request.request_type),
                decoded: payload.kind_name(),
            });
        }

        let created_at = parse_creation_date(&request.creation_date)?;
        self.normalize(payload, &request.request_id, created_at)
    }

    pub fn normalize(
        &self,
        payload: RawPayload,
        request_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Transaction, PayloadValidationError> {
        if request_id.is_empty() {
            return Err(PayloadValidationError::MissingField("request_id"));
        }
        let tx = match payload {
            RawPayload::Safe(safe) => self.normalize_safe(safe, request_id, created_at)?,
            RawPayload::Eoa(eoa) => normalize_eoa(eoa, request_id, created_at)?,
        };
        info!(
            tx_id = %tx.id,
            kind = if tx.is_safe() { "safe" } else { "eoa" },
            chain_id = %tx.chain_id,
            to = %tx.to,
            "Transaction normalized"
        );
        Ok(tx)
    }

    fn normalize_safe(
        &self,
        safe: Eip712SafeTx,
        request_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Transaction, PayloadValidationError> {
        let original_signer = to_address(&safe.from, "from");
        let kind = TransactionKind::Safe { original_signer };
        let mut tx = Transaction::new(request_id, created_at, kind);

        tx.chain_id = to_quantity(Some(&safe.chain_id), "chainId")?;
        tx.from = to_address(&safe.safe_address, "safeAddress");
        tx.to = to_address(&safe.to, "to");
        tx.value = to_quantity(safe.value.as_ref(), "value")?;
        tx.data = to_hex_bytes(safe.data.as_deref(), "data")?;
        tx.nonce = to_quantity(safe.nonce.as_ref(), "nonce")?;

        // The Safe pays real gas at execution time, so the relayed metadata
        // has none; these only parameterize the simulation.
        tx.gas = self.safe_defaults.gas_limit.clone();
        tx.max_fee_per_gas = self.safe_defaults.max_fee_per_gas.clone();
        tx.max_priority_fee_per_gas = self.safe_defaults.max_priority_fee_per_gas.clone();

        warn_on_refund_parameters(&safe, request_id)?;
        Ok(tx)
    }
}

fn normalize_eoa(
    eoa: EoaTx,
    request_id: &str,
    created_at: DateTime<Utc>,
) -> Result<Transaction, PayloadValidationError> {
    let mut tx = Transaction::new(request_id, created_at, TransactionKind::Eoa);
    tx.chain_id = to_quantity(Some(&eoa.chain_id), "chainId")?;
    tx.from = to_address(&eoa.from, "from");
    tx.to = to_address(&eoa.to, "to");
    tx.value = to_quantity(eoa.value.as_ref(), "value")?;
    tx.data = to_hex_bytes(eoa.data.as_deref(), "data")?;
    tx.gas = to_quantity(eoa.gas.as_ref(), "gas")?;
    tx.max_fee_per_gas = to_quantity(eoa.max_fee_per_gas.as_ref(), "maxFeePerGas")?;
    tx.max_priority_fee_per_gas =
        to_quantity(eoa.max_priority_fee_per_gas.as_ref(), "maxPriorityFeePerGas")?;
    tx.nonce = to_quantity(eoa.nonce.as_ref(), "nonce")?;
    Ok(tx)
}

/// Refund parameters are hashed as zero in this flow. A payload that asks
/// for anything else will not match the hardware wallet, so say so.
fn warn_on_refund_parameters(
    safe: &Eip712SafeTx,
    request_id: &str,
) -> Result<(), PayloadValidationError> {
    let declared_operation = to_quantity(safe.operation.as_ref(), "operation")?;
    let refund_quantities = [
        ("safeTxGas", to_quantity(safe.safe_tx_gas.as_ref(), "safeTxGas")?),
        ("baseGas", to_quantity(safe.base_gas.as_ref(), "baseGas")?),
        ("gasPrice", to_quantity(safe.gas_price.as_ref(), "gasPrice")?),
    ];
    for (field, value) in refund_quantities {
        if value != "0x0" {
            warn!(
                tx_id = request_id,
                field,
                value = %value,
                "Safe payload requests non-zero refund parameter"
            );
        }
    }
    for (field, raw) in [("gasToken", &safe.gas_token), ("refundReceiver", &safe.refund_receiver)] {
        if let Some(raw) = raw {
            if to_address(raw, field) != ZERO_ADDRESS {
                warn!(tx_id = request_id, field, "Safe payload names a non-zero refund address");
            }
        }
    }
    if declared_operation != "0x0" {
        info!(
            tx_id = request_id,
            operation = %declared_operation,
            "Safe payload declares a non-call operation"
        );
    }
    Ok(())
}

/// `0x`-prefixed lowercase hex with no leading zeros. Accepts hex text,
/// decimal text and integers; missing or empty becomes `0x0`.
pub fn to_quantity(
    raw: Option<&FieldValue>,
    field: &'static str,
) -> Result<String, PayloadValidationError> {
    let value = match raw {
        None => U256::ZERO,
        Some(FieldValue::Uint(n)) => U256::from(*n),
        Some(FieldValue::Text(s)) => parse_quantity_text(s.trim()).ok_or_else(|| {
            PayloadValidationError::InvalidQuantity {
                field,
                value: s.clone(),
            }
        })?,
    };
    Ok(format!("{value:#x}"))
}

fn parse_quantity_text(s: &str) -> Option<U256> {
    if s.is_empty() {
        return Some(U256::ZERO);
    }
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(U256::ZERO),
        Some(digits) => U256::from_str_radix(digits, 16).ok(),
        None => U256::from_str_radix(s, 10).ok(),
    }
}

/// Even-length lowercase hex; missing or empty becomes `0x`.
pub fn to_hex_bytes(
    raw: Option<&str>,
    field: &'static str,
) -> Result<String, PayloadValidationError> {
    let raw = raw.unwrap_or("").trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PayloadValidationError::InvalidBytes { field });
    }
    let digits = digits.to_ascii_lowercase();
    if digits.len() % 2 == 1 {
        Ok(format!("0x0{digits}"))
    } else {
        Ok(format!("0x{digits}"))
    }
}

/// Lowercase address. Malformed input is logged and becomes the zero address.
pub fn to_address(raw: &str, field: &'static str) -> String {
    match Address::from_str(raw.trim()) {
        Ok(address) => format!("0x{}", hex::encode(address.as_slice())),
        Err(e) => {
            warn!(
                field,
                raw = %raw,
                error = %e,
                "Malformed address in payload; substituting zero address"
            );
            ZERO_ADDRESS.to_string()
        }
    }
}

/// RFC 3339, or a unix timestamp in seconds or milliseconds.
pub fn parse_creation_date(raw: &str) -> Result<DateTime<Utc>, PayloadValidationError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let invalid = || PayloadValidationError::InvalidTimestamp(raw.to_string());
    let number: i64 = raw.trim().parse().map_err(|_| invalid())?;
    let parsed = if number > 100_000_000_000 {
        Utc.timestamp_millis_opt(number)
    } else {
        Utc.timestamp_opt(number, 0)
    };
    parsed.single().ok_or_else(invalid)
}
