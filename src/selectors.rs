//! Display labels for well-known method selectors.
//!
//! This is a heuristic lookup, not an ABI decoder. It covers common ERC-20,
//! staking, router and Safe entry points and returns `Unknown` for the rest.

use crate::transaction::Transaction;
use std::collections::HashMap;

pub const UNKNOWN_OPERATION: &str = "Unknown";

lazy_static::lazy_static! {
    static ref METHOD_LABELS: HashMap<&'static str, &'static str> = HashMap::from([
        ("0xa9059cbb", "transfer"),
        ("0x23b872dd", "transferFrom"),
        ("0x095ea7b3", "approve"),
        ("0x39509351", "increaseAllowance"),
        ("0xa22cb465", "setApprovalForAll"),
        ("0x40c10f19", "mint"),
        ("0x42966c68", "burn"),
        ("0x79cc6790", "burnFrom"),
        ("0x2e1a7d4d", "withdraw"),
        ("0x853828b6", "withdrawAll"),
        ("0xd0e30db0", "deposit"),
        ("0xb6b55f25", "deposit"),
        ("0xde5f6268", "depositAll"),
        ("0xa694fc3a", "stake"),
        ("0x2e17de78", "unstake"),
        ("0x4e71d92d", "claim"),
        ("0xd1058e59", "claimAll"),
        ("0xf69e2046", "compound"),
        ("0x4641257d", "harvest"),
        ("0x3d18b912", "getReward"),
        ("0x38ed1739", "swapExactTokensForTokens"),
        ("0x8803dbee", "swapTokensForExactTokens"),
        ("0x7ff36ab5", "swapExactETHForTokens"),
        ("0x4a25d94a", "swapTokensForExactETH"),
        ("0x18cbafe5", "swapExactTokensForETH"),
        ("0xfb3bdb41", "swapETHForExactTokens"),
        ("0x3593564c", "execute"),
        ("0xac9650d8", "multicall"),
        ("0x8d80ff0a", "multiSend"),
        ("0x6a761202", "execTransaction"),
    ]);
}

pub fn label_for_selector(selector: &str) -> Option<&'static str> {
    METHOD_LABELS.get(selector.to_ascii_lowercase().as_str()).copied()
}

/// Coarse label for the call. A bare value transfer is `transfer`.
pub fn operation_label(tx: &Transaction) -> &'static str {
    if tx.value != "0x0" && tx.data == "0x" {
        return "transfer";
    }
    tx.selector()
        .and_then(label_for_selector)
        .unwrap_or(UNKNOWN_OPERATION)
}
