//! Turns simulated logs into asset changes relative to the signer.
//!
//! Only ERC-20 `Transfer` and `Approval` events are interpreted. Transfers
//! between two third parties are dropped, approvals are kept only when the
//! signer is the owner.

use crate::error::SimulationError;
use crate::selectors;
use crate::tokens::{TokenInfo, TokenResolver};
use crate::transaction::Transaction;
use crate::types::{CallResult, EthereumLog};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `keccak256("Transfer(address,address,uint256)")`
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
/// `keccak256("Approval(address,address,uint256)")`
pub const APPROVAL_TOPIC: &str =
    "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Transfer,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub direction: Direction,
    pub token_address: String,
    pub symbol: String,
    pub decimals: u8,
    /// Decimal string scaled by `decimals`.
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub contract_address: String,
    pub from: String,
    pub to: String,
    /// Heuristic label from the method selector.
    pub operation: String,
    pub changes: Vec<AssetChange>,
    pub chain_id: String,
}

/// A decoded event the signer takes part in, before token metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignerEvent {
    change_type: ChangeType,
    direction: Direction,
    from: String,
    to: String,
    amount: U256,
}

pub struct EventInterpreter {
    resolver: Arc<dyn TokenResolver>,
}

impl EventInterpreter {
    pub fn new(resolver: Arc<dyn TokenResolver>) -> Self {
        Self { resolver }
    }

    pub async fn interpret(
        &self,
        tx: &Transaction,
        call: &CallResult,
    ) -> Result<SimulationResult, SimulationError> {
        let signer = tx.from.to_lowercase();
        let mut changes = Vec::new();

        for (token, logs) in group_by_token(&call.logs) {
            let events = signer_events(&signer, &logs);
            if events.is_empty() {
                continue;
            }
            let info = self.token_info(&tx.chain_id, &token).await;
            debug!(
                tx_id = %tx.id,
                token = %token,
                events = events.len(),
                "Token events attributed to signer"
            );
            changes.extend(events.into_iter().map(|event| asset_change(&token, &info, event)));
        }

        if changes.is_empty() {
            info!(tx_id = %tx.id, logs = call.logs.len(), "No asset changes involve the signer");
            return Err(SimulationError::NoChanges);
        }

        Ok(SimulationResult {
            contract_address: tx.to.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            operation: selectors::operation_label(tx).to_string(),
            changes,
            chain_id: tx.chain_id.clone(),
        })
    }

    /// Never fails: an unresolvable token gets a placeholder with a warning.
    async fn token_info(&self, chain_id: &str, token: &str) -> TokenInfo {
        match self.resolver.resolve_token(chain_id, token).await {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    token = %token,
                    chain_id,
                    error = %e,
                    "Token metadata unresolved; flagging as unknown"
                );
                TokenInfo::unknown(chain_id, token)
            }
        }
    }
}

/// Logs grouped by lowercase emitter address, in first-seen order.
pub fn group_by_token(logs: &[EthereumLog]) -> Vec<(String, Vec<&EthereumLog>)> {
    let mut groups: Vec<(String, Vec<&EthereumLog>)> = Vec::new();
    for log in logs {
        let address = log.address.to_lowercase();
        match groups.iter_mut().find(|(token, _)| *token == address) {
            Some((_, group)) => group.push(log),
            None => groups.push((address, vec![log])),
        }
    }
    groups
}

/// Approvals first, then transfers, each in log order.
fn signer_events(signer: &str, logs: &[&EthereumLog]) -> Vec<SignerEvent> {
    let mut events = Vec::new();

    // The same approval can be traced more than once.
    let mut seen = HashSet::new();
    for log in logs.iter().filter(|log| has_topic(log, APPROVAL_TOPIC) && log.topics.len() >= 3) {
        let (Some(owner), Some(spender)) =
            (topic_address(&log.topics[1]), topic_address(&log.topics[2]))
        else {
            continue;
        };
        if owner != signer {
            continue;
        }
        let key = (
            log.topics[1].to_lowercase(),
            log.topics[2].to_lowercase(),
            log.data.to_lowercase(),
        );
        if !seen.insert(key) {
            continue;
        }
        let Some(amount) = data_amount(&log.data) else {
            warn!(token = %log.address, "Approval with undecodable amount skipped");
            continue;
        };
        events.push(SignerEvent {
            change_type: ChangeType::Approval,
            direction: Direction::Increase,
            from: owner,
            to: spender,
            amount,
        });
    }

    // ERC-721 transfers index the token id as a fourth topic; only the
    // three-topic ERC-20 shape carries an amount in data.
    for log in logs.iter().filter(|log| has_topic(log, TRANSFER_TOPIC) && log.topics.len() == 3) {
        let (Some(from), Some(to)) =
            (topic_address(&log.topics[1]), topic_address(&log.topics[2]))
        else {
            continue;
        };
        let direction = if to == signer {
            Direction::Increase
        } else if from == signer {
            Direction::Decrease
        } else {
            continue;
        };
        let Some(amount) = data_amount(&log.data) else {
            warn!(token = %log.address, "Transfer with undecodable amount skipped");
            continue;
        };
        events.push(SignerEvent {
            change_type: ChangeType::Transfer,
            direction,
            from,
            to,
            amount,
        });
    }

    events
}

fn asset_change(token: &str, info: &TokenInfo, event: SignerEvent) -> AssetChange {
    AssetChange {
        change_type: event.change_type,
        direction: event.direction,
        token_address: token.to_string(),
        symbol: info.symbol.clone(),
        decimals: info.decimals,
        amount: format_units(event.amount, info.decimals),
        from: Some(event.from),
        to: Some(event.to),
        icon: info.icon.clone(),
        warning: info.warning.clone(),
    }
}

fn has_topic(log: &EthereumLog, topic: &str) -> bool {
    log.topics
        .first()
        .map(|t| t.eq_ignore_ascii_case(topic))
        .unwrap_or(false)
}

/// Address held in the low 20 bytes of an indexed topic.
fn topic_address(topic: &str) -> Option<String> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", digits[24..].to_lowercase()))
}

fn data_amount(data: &str) -> Option<U256> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    if digits.is_empty() || digits.len() > 64 {
        return None;
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Decimal rendering with trailing fractional zeros trimmed but at least
/// one fractional digit (`1.0`, `0.5`, `1234.000001`).
/// Works on the decimal string, so any `decimals` a token reports is
/// honored even when `10^decimals` does not fit in 256 bits.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let decimals = usize::from(decimals);
    let digits = format!("{:0>width$}", amount.to_string(), width = decimals + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{fraction}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{StaticSource, UNKNOWN_TOKEN_WARNING};
    use crate::transaction::TransactionKind;
    use chrono::Utc;

    const SIGNER: &str = "0x676ad4839a3cbb3739000153e4802bf4ce6aef3f";
    const ALICE: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";
    const BOB: &str = "0x8ce19266498acc8ce67e8d33ae479ce7932a9fe6";
    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

    fn topic(address: &str) -> String {
        format!("0x{:0>64}", &address[2..])
    }

    fn word(n: u64) -> String {
        format!("0x{n:064x}")
    }

    fn log(token: &str, event: &str, a: &str, b: &str, amount: u64) -> EthereumLog {
        EthereumLog {
            address: token.into(),
            topics: vec![event.into(), topic(a), topic(b)],
            data: word(amount),
            block_number: None,
            transaction_hash: None,
            log_index: None,
        }
    }

    fn tx() -> Transaction {
        let mut tx = Transaction::new("req-1", Utc::now(), TransactionKind::Eoa);
        tx.chain_id = "0x1".into();
        tx.from = SIGNER.into();
        tx.to = USDC.into();
        tx.data = "0xa9059cbb".into();
        tx
    }

    fn interpreter() -> EventInterpreter {
        let usdc = TokenInfo {
            chain_id: "0x1".into(),
            address: USDC.into(),
            name: "USD Coin".into(),
            symbol: "USDC".into(),
            decimals: 6,
            icon: None,
            warning: None,
        };
        EventInterpreter::new(Arc::new(StaticSource::new().with_token(usdc)))
    }

    fn call(logs: Vec<EthereumLog>) -> CallResult {
        CallResult {
            status: "0x1".into(),
            logs,
            ..Default::default()
        }
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_000_000u64), 6), "1.0");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_units(U256::from(1_234_000_001u64), 6), "1234.000001");
        assert_eq!(format_units(U256::from(42u64), 0), "42.0");
        assert_eq!(format_units(U256::ZERO, 18), "0.0");
    }

    #[test]
    fn test_format_units_beyond_u256_scale() {
        let tiny = format_units(U256::from(1u64), 100);
        assert_eq!(tiny, format!("0.{}1", "0".repeat(99)));
        assert_eq!(format_units(U256::from(25u64), 78), format!("0.{}25", "0".repeat(76)));
        assert_eq!(format_units(U256::MAX, 255).split('.').next(), Some("0"));
    }

    #[test]
    fn test_grouping_is_case_insensitive_and_ordered() {
        let logs = vec![
            log(WETH, TRANSFER_TOPIC, ALICE, BOB, 1),
            log(&USDC.to_uppercase().replace("0X", "0x"), TRANSFER_TOPIC, ALICE, BOB, 2),
            log(USDC, TRANSFER_TOPIC, ALICE, BOB, 3),
        ];
        let groups = group_by_token(&logs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, WETH);
        assert_eq!(groups[1].0, USDC);
        assert_eq!(groups[1].1.len(), 2);
    }

    #[tokio::test]
    async fn test_incoming_transfer_is_increase() {
        let result = interpreter()
            .interpret(&tx(), &call(vec![log(USDC, TRANSFER_TOPIC, ALICE, SIGNER, 2_500_000)]))
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 1);
        let change = &result.changes[0];
        assert_eq!(change.change_type, ChangeType::Transfer);
        assert_eq!(change.direction, Direction::Increase);
        assert_eq!(change.amount, "2.5");
        assert_eq!(change.symbol, "USDC");
        assert_eq!(change.from.as_deref(), Some(ALICE));
        assert_eq!(result.operation, "transfer");
    }

    #[tokio::test]
    async fn test_outgoing_transfer_is_decrease() {
        let result = interpreter()
            .interpret(&tx(), &call(vec![log(USDC, TRANSFER_TOPIC, SIGNER, ALICE, 1_000_000)]))
            .await
            .unwrap();
        assert_eq!(result.changes[0].direction, Direction::Decrease);
    }

    #[tokio::test]
    async fn test_third_party_transfer_is_dropped() {
        let err = interpreter()
            .interpret(&tx(), &call(vec![log(USDC, TRANSFER_TOPIC, ALICE, BOB, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SimulationError::NoChanges));
    }

    #[tokio::test]
    async fn test_duplicate_approvals_collapse() {
        let approval = log(USDC, APPROVAL_TOPIC, SIGNER, ALICE, 5_000_000);
        let foreign = log(USDC, APPROVAL_TOPIC, BOB, ALICE, 5_000_000);
        let result = interpreter()
            .interpret(&tx(), &call(vec![approval.clone(), approval, foreign]))
            .await
            .unwrap();
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::Approval);
        assert_eq!(result.changes[0].direction, Direction::Increase);
        assert_eq!(result.changes[0].to.as_deref(), Some(ALICE));
    }

    #[tokio::test]
    async fn test_nft_transfer_shape_is_ignored() {
        let mut nft = log(USDC, TRANSFER_TOPIC, SIGNER, ALICE, 0);
        nft.topics.push(word(7));
        nft.data = "0x".into();
        let err = interpreter().interpret(&tx(), &call(vec![nft])).await.unwrap_err();
        assert!(matches!(err, SimulationError::NoChanges));
    }

    #[tokio::test]
    async fn test_unresolved_token_warns_on_every_change() {
        let logs = vec![
            log(WETH, APPROVAL_TOPIC, SIGNER, ALICE, 1),
            log(WETH, TRANSFER_TOPIC, SIGNER, ALICE, 1_000_000_000_000_000_000),
        ];
        let result = interpreter().interpret(&tx(), &call(logs)).await.unwrap();
        assert_eq!(result.changes.len(), 2);
        for change in &result.changes {
            assert_eq!(change.warning.as_deref(), Some(UNKNOWN_TOKEN_WARNING));
            assert_eq!(change.decimals, 18);
        }
        assert_eq!(result.changes[1].amount, "1.0");
    }

    #[test]
    fn test_asset_change_wire_shape() {
        let change = AssetChange {
            change_type: ChangeType::Approval,
            direction: Direction::Increase,
            token_address: USDC.into(),
            symbol: "USDC".into(),
            decimals: 6,
            amount: "1.0".into(),
            from: None,
            to: None,
            icon: None,
            warning: None,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "approval");
        assert_eq!(json["direction"], "increase");
        assert_eq!(json["tokenAddress"], USDC);
        assert!(json.get("warning").is_none());
    }
}
