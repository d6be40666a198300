//! Hardware-wallet verification hashes.
//!
//! Safe transactions are signed off-chain with EIP-712, so the wallet shows
//! a domain hash and a message hash. EOA transactions are signed as unsigned
//! EIP-1559 envelopes, so the wallet shows `keccak256(0x02 || rlp(tx))`.
//! Every hash is returned in full; truncation is up to the caller.

use crate::error::HashComputationError;
use crate::safe;
use crate::transaction::{Transaction, TransactionKind};

use alloy_primitives::{b256, keccak256, Address, B256, U256};
use alloy_sol_types::{sol, SolStruct, SolValue};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Eip1559TransactionRequest, NameOrAddress, H160};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// `keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")`
pub const DOMAIN_SEPARATOR_TYPEHASH: B256 =
    b256!("47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218");

/// `keccak256("EIP712Domain(address verifyingContract)")`, used before 1.3.0.
pub const DOMAIN_SEPARATOR_TYPEHASH_LEGACY: B256 =
    b256!("035aff83d86937d35b32e04f0ddc6ff469290eef2f1b692d8a815c89404d4749");

pub const SAFE_TX_TYPEHASH: B256 =
    b256!("bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8");

sol! {
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

// ── Safe version ────────────────────────────────────────────────

/// `major.minor.patch`, compared numerically field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SafeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SafeVersion {
    /// First version whose domain includes `chainId`.
    pub const V1_3_0: SafeVersion = SafeVersion::new(1, 3, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_legacy(&self) -> bool {
        *self < Self::V1_3_0
    }
}

impl Default for SafeVersion {
    fn default() -> Self {
        Self::V1_3_0
    }
}

impl FromStr for SafeVersion {
    type Err = HashComputationError;

    /// Missing components are zero and a `+build` suffix is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.trim().split('+').next().unwrap_or_default();
        if core.is_empty() {
            return Err(HashComputationError::InvalidVersion(s.to_string()));
        }
        let mut parts = [0u64; 3];
        for (i, part) in core.split('.').enumerate() {
            let slot = parts
                .get_mut(i)
                .ok_or_else(|| HashComputationError::InvalidVersion(s.to_string()))?;
            *slot = part
                .parse()
                .map_err(|_| HashComputationError::InvalidVersion(s.to_string()))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for SafeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ── Output ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeHashes {
    pub domain_hash: String,
    pub message_hash: String,
    /// `keccak256(0x1901 || domainHash || messageHash)`
    pub safe_tx_hash: String,
    pub operation: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EoaHashes {
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransactionHashes {
    Safe(SafeHashes),
    Eoa(EoaHashes),
}

// ── Engine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct HashEngine {
    safe_version: SafeVersion,
}

impl HashEngine {
    pub fn new(safe_version: SafeVersion) -> Self {
        Self { safe_version }
    }

    pub fn safe_version(&self) -> SafeVersion {
        self.safe_version
    }

    /// Picks the algorithm from the transaction kind.
    pub fn compute(&self, tx: &Transaction) -> Result<TransactionHashes, HashComputationError> {
        let hashes = match tx.kind() {
            TransactionKind::Safe { .. } => TransactionHashes::Safe(self.safe_hashes(tx)?),
            TransactionKind::Eoa => TransactionHashes::Eoa(EoaHashes {
                tx_hash: hex_b256(eoa_tx_hash(tx)?),
            }),
        };
        debug!(tx_id = %tx.id, hashes = ?hashes, "Verification hashes computed");
        Ok(hashes)
    }

    pub fn safe_hashes(&self, tx: &Transaction) -> Result<SafeHashes, HashComputationError> {
        let chain_id = parse_u256("chainId", &tx.chain_id)?;
        let safe = parse_address("from", &tx.from)?;
        let domain = self.domain_hash(chain_id, safe);
        let operation = safe::operation_for(tx);
        let message = message_hash(tx, operation)?;

        Ok(SafeHashes {
            domain_hash: hex_b256(domain),
            message_hash: hex_b256(message),
            safe_tx_hash: hex_b256(safe_tx_hash(domain, message)),
            operation,
        })
    }

    /// Depends only on the chain, the Safe address and the Safe version.
    pub fn domain_hash(&self, chain_id: U256, safe: Address) -> B256 {
        if self.safe_version.is_legacy() {
            keccak256((DOMAIN_SEPARATOR_TYPEHASH_LEGACY, safe).abi_encode())
        } else {
            keccak256((DOMAIN_SEPARATOR_TYPEHASH, chain_id, safe).abi_encode())
        }
    }
}

/// EIP-712 struct hash of the Safe transaction. Refund parameters are zero
/// in this flow.
pub fn message_hash(tx: &Transaction, operation: u8) -> Result<B256, HashComputationError> {
    let safe_tx = SafeTx {
        to: parse_address("to", &tx.to)?,
        value: parse_u256("value", &tx.value)?,
        data: parse_bytes("data", &tx.data)?.into(),
        operation,
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        nonce: parse_u256("nonce", &tx.nonce)?,
    };
    Ok(safe_tx.eip712_hash_struct())
}

pub fn safe_tx_hash(domain: B256, message: B256) -> B256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain.as_slice());
    buf.extend_from_slice(message.as_slice());
    keccak256(buf)
}

/// Hash a hardware wallet signs for an EIP-1559 transaction.
pub fn eoa_tx_hash(tx: &Transaction) -> Result<B256, HashComputationError> {
    let chain_id = u64::try_from(parse_u256("chainId", &tx.chain_id)?).map_err(|e| {
        HashComputationError::InvalidField {
            field: "chainId",
            reason: e.to_string(),
        }
    })?;
    let to = parse_address("to", &tx.to)?;

    let request = Eip1559TransactionRequest::new()
        .to(NameOrAddress::Address(H160::from_slice(to.as_slice())))
        .data(parse_bytes("data", &tx.data)?)
        .value(to_ethers_u256(parse_u256("value", &tx.value)?))
        .gas(to_ethers_u256(parse_u256("gas", &tx.gas)?))
        .max_fee_per_gas(to_ethers_u256(parse_u256("maxFeePerGas", &tx.max_fee_per_gas)?))
        .max_priority_fee_per_gas(to_ethers_u256(parse_u256(
            "maxPriorityFeePerGas",
            &tx.max_priority_fee_per_gas,
        )?))
        .nonce(to_ethers_u256(parse_u256("nonce", &tx.nonce)?))
        .chain_id(chain_id);

    let sighash = TypedTransaction::Eip1559(request).sighash();
    Ok(B256::from(sighash.0))
}

// ── Field parsing ───────────────────────────────────────────────

pub(crate) fn parse_address(
    field: &'static str,
    raw: &str,
) -> Result<Address, HashComputationError> {
    Address::from_str(raw).map_err(|e| HashComputationError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

pub(crate) fn parse_u256(field: &'static str, raw: &str) -> Result<U256, HashComputationError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| HashComputationError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

pub(crate) fn parse_bytes(field: &'static str, raw: &str) -> Result<Vec<u8>, HashComputationError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| HashComputationError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn to_ethers_u256(value: U256) -> ethers::types::U256 {
    ethers::types::U256::from_big_endian(&value.to_be_bytes::<32>())
}

fn hex_b256(hash: B256) -> String {
    format!("0x{}", hex::encode(hash))
}
