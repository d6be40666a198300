//! Safe (multisig) contract constants and call encoders.
//!
//! Besides the `execTransaction` encoder, this module carries the bytecode
//! substitution used to dry-run a delegatecall batch through a stateless
//! `eth_simulateV1` call: the Safe's code is swapped for a small proxy that
//! exposes `delegateCallExecute(target, data)`, and the Safe's original code
//! is parked at [`ORIGINAL_CODE_ADDRESS`] where the proxy forwards everything
//! else.

use crate::error::HashComputationError;
use crate::hash::{parse_address, parse_bytes, parse_u256};
use crate::transaction::Transaction;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use serde_json::{json, Value};

/// `multiSend(bytes)`
pub const MULTICALL_SELECTOR: &str = "0x8d80ff0a";

/// Safe's MultiSendCallOnly router. Only batches sent here are delegatecalls.
pub const DELEGATE_CALL_ROUTER: &str = "0x40a2accbd92bca938b02010e17a5b8929b49130d";

/// Where the Safe's original code is installed during a batch dry-run.
/// The delegate proxy hardcodes this address.
pub const ORIGINAL_CODE_ADDRESS: &str = "0x0000000000000000000000000000000000920515";

/// Safe `Enum.Operation`.
pub const OPERATION_CALL: u8 = 0;
pub const OPERATION_DELEGATE_CALL: u8 = 1;

sol! {
    function delegateCallExecute(address target, bytes data);

    function execTransaction(
        address to,
        uint256 value,
        bytes data,
        uint8 operation,
        uint256 safeTxGas,
        uint256 baseGas,
        uint256 gasPrice,
        address gasToken,
        address refundReceiver,
        bytes signatures
    ) returns (bool success);
}

// ── Bytecode overrides ──────────────────────────────────────────

/// Minimal proxy installed at the Safe address for batch dry-runs.
pub const SAFE_DELEGATE_PROXY_CODE: &str = concat!(
    "0x6080604052600436106100225760003560e01c80639fe839781461004957610023565b5b6292051536600080376000",
    "80366000845af43d6000803e80610044573d6000fd5b3d6000f35b610063600480360381019061005e91906102eb565b",
    "610079565b60405161007091906103c6565b60405180910390f35b60606000808473ffffffffffffffffffffffffffff",
    "ffffffffffff16846040516100a39190610424565b600060405180830381855af49150503d80600081146100de576040",
    "519150601f19603f3d011682016040523d82523d6000602084013e6100e3565b606091505b5091509150816101285760",
    "40517f08c379a000000000000000000000000000000000000000000000000000000000815260040161011f9061049856",
    "5b60405180910390fd5b809250505092915050565b6000604051905090565b600080fd5b600080fd5b600073ffffffff",
    "ffffffffffffffffffffffffffffffff82169050919050565b600061017282610147565b9050919050565b6101828161",
    "0167565b811461018d57600080fd5b50565b60008135905061019f81610179565b92915050565b600080fd5b600080fd",
    "5b6000601f19601f8301169050919050565b7f4e487b7100000000000000000000000000000000000000000000000000",
    "000000600052604160045260246000fd5b6101f8826101af565b810181811067ffffffffffffffff8211171561021757",
    "6102166101c0565b5b80604052505050565b600061022a610133565b905061023682826101ef565b919050565b600067",
    "ffffffffffffffff821115610256576102556101c0565b5b61025f826101af565b9050602081019050919050565b8281",
    "8337600083830152505050565b600061028e6102898461023b565b610220565b90508281526020810184848401111561",
    "02aa576102a96101aa565b5b6102b584828561026c565b509392505050565b600082601f8301126102d2576102d16101",
    "a5565b5b81356102e284826020860161027b565b91505092915050565b60008060408385031215610302576103016101",
    "3d565b5b600061031085828601610190565b925050602083013567ffffffffffffffff81111561033157610330610142",
    "565b5b61033d858286016102bd565b9150509250929050565b600081519050919050565b600082825260208201905092",
    "915050565b60005b83811015610381578082015181840152602081019050610366565b60008484015250505050565b60",
    "0061039882610347565b6103a28185610352565b93506103b2818560208601610363565b6103bb816101af565b840191",
    "505092915050565b600060208201905081810360008301526103e0818461038d565b905092915050565b600081905092",
    "915050565b60006103fe82610347565b61040881856103e8565b9350610418818560208601610363565b808401915050",
    "92915050565b600061043082846103f3565b915081905092915050565b600082825260208201905092915050565b7f44",
    "656c65676174652063616c6c206661696c6564000000000000000000000000600082015250565b600061048260148361",
    "043b565b915061048d8261044c565b602082019050919050565b600060208201905081810360008301526104b1816104",
    "75565b9050919050565b60006104c98261043b565b91506104d48261044c565b602082019050919050565b6000602082",
    "01905081810360008301526104f8816104b1565b905091905056fea26469706673582212203e96f34ac95ff29da01f27",
    "c2e715937c3b3829ae9ffeb1111dd78145a79362dc64736f6c63430008120033",
);

/// Safe code parked at [`ORIGINAL_CODE_ADDRESS`] during a batch dry-run.
pub const SAFE_ORIGINAL_CODE: &str = concat!(
    "0x608060405273ffffffffffffffffffffffffffffffffffffffff600054167fa619486e000000000000000000000000",
    "0000000000000000000000000000000060003514156050578060005260206000f35b3660008037600080366000845af4",
    "3d6000803e60008114156070573d6000fd5b3d6000f3fea2646970667358221220d1429297349653a4918076d650332d",
    "e1a1068c5f3e07c5c82360c277770b955264736f6c63430007060033",
);

// ── Classification ──────────────────────────────────────────────

/// A call is a delegatecall batch only when both the selector and the
/// router address match. Selector alone is not enough.
pub fn is_multicall(selector: &str, to: &str) -> bool {
    selector.eq_ignore_ascii_case(MULTICALL_SELECTOR)
        && to.eq_ignore_ascii_case(DELEGATE_CALL_ROUTER)
}

pub fn is_multicall_tx(tx: &Transaction) -> bool {
    tx.selector()
        .map(|selector| is_multicall(selector, &tx.to))
        .unwrap_or(false)
}

/// Safe operation implied by the call shape.
pub fn operation_for(tx: &Transaction) -> u8 {
    if is_multicall_tx(tx) {
        OPERATION_DELEGATE_CALL
    } else {
        OPERATION_CALL
    }
}

// ── Encoders ────────────────────────────────────────────────────

/// Calldata routing `tx.data` through the proxy's `delegateCallExecute`.
pub fn encode_delegate_execute(tx: &Transaction) -> Result<String, HashComputationError> {
    let call = delegateCallExecuteCall {
        target: parse_address("to", &tx.to)?,
        data: Bytes::from(parse_bytes("data", &tx.data)?),
    };
    Ok(format!("0x{}", hex::encode(call.abi_encode())))
}

/// `stateOverrides` object for a batch dry-run of `safe`.
pub fn batch_state_overrides(safe: &str) -> Value {
    let mut overrides = serde_json::Map::new();
    overrides.insert(safe.to_lowercase(), json!({ "code": SAFE_DELEGATE_PROXY_CODE }));
    overrides.insert(ORIGINAL_CODE_ADDRESS.to_string(), json!({ "code": SAFE_ORIGINAL_CODE }));
    Value::Object(overrides)
}

/// Pre-validated signature for `signer`: `r = signer`, `s = 0`, `v = 1`.
/// The Safe accepts it when `signer` is the one submitting the call.
pub fn prevalidated_signature(signer: Address) -> Vec<u8> {
    let mut signature = Vec::with_capacity(65);
    signature.extend_from_slice(&[0u8; 12]);
    signature.extend_from_slice(signer.as_slice());
    signature.extend_from_slice(&[0u8; 32]);
    signature.push(1);
    signature
}

/// `execTransaction` calldata for a Safe transaction submitted by its
/// original signer, with zeroed refund parameters.
pub fn exec_transaction_calldata(tx: &Transaction) -> Result<String, HashComputationError> {
    let signer = tx.original_signer().ok_or_else(|| HashComputationError::InvalidField {
        field: "originalSigner",
        reason: "not a Safe transaction".into(),
    })?;
    let call = execTransactionCall {
        to: parse_address("to", &tx.to)?,
        value: parse_u256("value", &tx.value)?,
        data: Bytes::from(parse_bytes("data", &tx.data)?),
        operation: operation_for(tx),
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        signatures: Bytes::from(prevalidated_signature(parse_address("originalSigner", signer)?)),
    };
    Ok(format!("0x{}", hex::encode(call.abi_encode())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;
    use chrono::Utc;

    const SAFE: &str = "0x676ad4839a3cbb3739000153e4802bf4ce6aef3f";
    const SIGNER: &str = "0x8ce19266498acc8ce67e8d33ae479ce7932a9fe6";

    fn safe_tx(to: &str, data: &str) -> Transaction {
        let mut tx = Transaction::new(
            "req-1",
            Utc::now(),
            TransactionKind::Safe {
                original_signer: SIGNER.into(),
            },
        );
        tx.from = SAFE.into();
        tx.to = to.into();
        tx.data = data.into();
        tx
    }

    #[test]
    fn test_multicall_requires_selector_and_router() {
        let other = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
        assert!(is_multicall("0x8d80ff0a", DELEGATE_CALL_ROUTER));
        assert!(!is_multicall("0x8d80ff0a", other));
        assert!(!is_multicall("0xa9059cbb", DELEGATE_CALL_ROUTER));
        assert!(is_multicall("0x8D80FF0A", "0x40A2ACCBD92BCA938B02010E17A5B8929B49130D"));
    }

    #[test]
    fn test_operation_follows_classification() {
        let batch = safe_tx(DELEGATE_CALL_ROUTER, "0x8d80ff0a00");
        let plain = safe_tx(DELEGATE_CALL_ROUTER, "0x");
        assert_eq!(operation_for(&batch), OPERATION_DELEGATE_CALL);
        assert_eq!(operation_for(&plain), OPERATION_CALL);
    }

    #[test]
    fn test_delegate_execute_layout() {
        assert_eq!(delegateCallExecuteCall::SELECTOR, [0x9f, 0xe8, 0x39, 0x78]);

        let tx = safe_tx(DELEGATE_CALL_ROUTER, "0x8d80ff0aaabb");
        let encoded = encode_delegate_execute(&tx).unwrap();
        let body = &encoded[10..];
        assert!(encoded.starts_with("0x9fe83978"));
        assert_eq!(&body[24..64], &DELEGATE_CALL_ROUTER[2..]);
        assert_eq!(&body[64..128], format!("{:064x}", 0x40));
        assert_eq!(&body[128..192], format!("{:064x}", 6));
        assert!(body[192..].starts_with("8d80ff0aaabb"));
    }

    #[test]
    fn test_state_overrides_install_both_codes() {
        let overrides = batch_state_overrides("0x676AD4839A3CBB3739000153E4802BF4CE6AEF3F");
        assert_eq!(overrides[SAFE]["code"], SAFE_DELEGATE_PROXY_CODE);
        assert_eq!(overrides[ORIGINAL_CODE_ADDRESS]["code"], SAFE_ORIGINAL_CODE);
        // The proxy forwards to the parked original code.
        assert!(SAFE_DELEGATE_PROXY_CODE.contains("62920515"));
    }

    #[test]
    fn test_exec_transaction_carries_prevalidated_signature() {
        let tx = safe_tx("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "0xa9059cbb");
        let encoded = exec_transaction_calldata(&tx).unwrap();
        assert!(encoded.starts_with(&format!("0x{}", hex::encode(execTransactionCall::SELECTOR))));

        let signature = prevalidated_signature(parse_address("signer", SIGNER).unwrap());
        assert_eq!(signature.len(), 65);
        assert_eq!(signature[64], 1);
        assert!(encoded.contains(&hex::encode(&signature)));
    }

    #[test]
    fn test_exec_transaction_rejects_eoa() {
        let tx = Transaction::new("req-2", Utc::now(), TransactionKind::Eoa);
        assert!(exec_transaction_calldata(&tx).is_err());
    }
}
