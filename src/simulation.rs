//! `eth_simulateV1` request construction and response validation.
//!
//! The gateway trusts the node's simulation as ground truth. A delegatecall
//! batch sent from a Safe cannot be replayed as a plain call, so it is
//! rewritten into a self-call through a bytecode-substituted proxy (see
//! [`crate::safe`]). Other backends only have to honor
//! [`SimulationBackend`].

use crate::config::RpcEndpoints;
use crate::error::SimulationError;
use crate::rpc::RpcClient;
use crate::safe;
use crate::transaction::Transaction;
use crate::types::{CallResult, JsonRpcRequest, JsonRpcResponse, SimulatedBlock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const SIMULATE_METHOD: &str = "eth_simulateV1";

#[async_trait]
pub trait SimulationBackend: Send + Sync {
    /// Runs `tx` and returns the single call result of the simulated block.
    async fn simulate(&self, tx: &Transaction) -> Result<CallResult, SimulationError>;
}

/// What is actually sent for a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    pub to: String,
    pub data: String,
    pub state_overrides: Value,
    pub validation: bool,
    /// True when the call was rewritten as a delegatecall batch dry-run.
    pub batch: bool,
}

pub struct SimulationGateway {
    rpc: RpcClient,
    endpoints: RpcEndpoints,
    validation: bool,
}

impl SimulationGateway {
    pub fn new(rpc: RpcClient, endpoints: RpcEndpoints) -> Self {
        Self {
            rpc,
            endpoints,
            validation: false,
        }
    }

    /// `validation` for plain calls. Batch dry-runs always disable it since
    /// no signature exists yet.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn plan(&self, tx: &Transaction) -> Result<SimulationPlan, SimulationError> {
        if tx.is_safe() && safe::is_multicall_tx(tx) {
            let data = safe::encode_delegate_execute(tx).map_err(|e| SimulationError::Protocol {
                message: e.to_string(),
                code: None,
                call_content: Value::Null,
            })?;
            return Ok(SimulationPlan {
                to: tx.from.clone(),
                data,
                state_overrides: safe::batch_state_overrides(&tx.from),
                validation: false,
                batch: true,
            });
        }
        Ok(SimulationPlan {
            to: tx.to.clone(),
            data: tx.data.clone(),
            state_overrides: json!({}),
            validation: self.validation,
            batch: false,
        })
    }

    /// Returns the request and the call object inside it.
    pub fn build_request(tx: &Transaction, plan: &SimulationPlan) -> (JsonRpcRequest, Value) {
        let call_content = json!({
            "from": tx.from,
            "to": plan.to,
            "data": plan.data,
            "value": tx.value,
            "gas": tx.gas,
            "maxFeePerGas": tx.max_fee_per_gas,
            "maxPriorityFeePerGas": tx.max_priority_fee_per_gas,
        });
        let params = json!([
            {
                "blockStateCalls": [{
                    "blockOverrides": { "baseFeePerGas": tx.max_fee_per_gas },
                    "stateOverrides": plan.state_overrides,
                    "calls": [call_content],
                }],
                "validation": plan.validation,
                "traceTransfers": true,
            },
            "latest"
        ]);
        (JsonRpcRequest::new(SIMULATE_METHOD, params), call_content)
    }

    /// At least one block with at least one call, and no error at either
    /// level.
    pub fn validate_response(
        resp: JsonRpcResponse,
        call_content: &Value,
    ) -> Result<CallResult, SimulationError> {
        if let Some(error) = resp.error {
            return Err(SimulationError::Protocol {
                message: error.message,
                code: error.code,
                call_content: call_content.clone(),
            });
        }

        let malformed = |detail: &str| SimulationError::Protocol {
            message: format!("invalid simulation response structure: {detail}"),
            code: None,
            call_content: call_content.clone(),
        };

        let result = resp.result.ok_or_else(|| malformed("missing result"))?;
        let blocks: Vec<SimulatedBlock> =
            serde_json::from_value(result).map_err(|e| malformed(&e.to_string()))?;
        let call = blocks
            .into_iter()
            .next()
            .and_then(|block| block.calls.into_iter().next())
            .ok_or_else(|| malformed("no call results"))?;

        if let Some(error) = &call.error {
            return Err(SimulationError::Protocol {
                message: error.message.clone(),
                code: error.code,
                call_content: call_content.clone(),
            });
        }
        Ok(call)
    }
}

#[async_trait]
impl SimulationBackend for SimulationGateway {
    async fn simulate(&self, tx: &Transaction) -> Result<CallResult, SimulationError> {
        let plan = self.plan(tx)?;
        let (request, call_content) = Self::build_request(tx, &plan);
        let url = self.endpoints.url_for(&tx.chain_id);

        info!(
            tx_id = %tx.id,
            chain_id = %tx.chain_id,
            batch = plan.batch,
            "Simulating transaction"
        );

        let resp = self.rpc.send(url, &request).await.map_err(|e| SimulationError::Request {
            message: e.message,
            code: e.status.map(i64::from),
            call_content: call_content.clone(),
        })?;

        let call = Self::validate_response(resp, &call_content).map_err(|e| {
            warn!(tx_id = %tx.id, error = %e, code = ?e.code(), "Simulation rejected");
            e
        })?;
        info!(
            tx_id = %tx.id,
            logs = call.logs.len(),
            gas_used = %call.gas_used,
            "Simulation complete"
        );
        Ok(call)
    }
}
