//! Configuration for the review daemon.

use crate::hash::SafeVersion;
use crate::normalizer::{SafeGasDefaults, DEFAULT_SAFE_FEE_PER_GAS, DEFAULT_SAFE_GAS_LIMIT};
use crate::relay::DEFAULT_DEVICE_NAME;

use anyhow::{Context, Result};
use std::collections::HashMap;

const DEFAULT_TOKEN_LIST_URL: &str =
    "https://raw.githubusercontent.com/lfglabs-dev/lucid_tokens/main/tokens";

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// JSON-RPC node used for simulations and ERC-20 metadata calls
    pub rpc: RpcEndpoints,

    /// Pairing/relay backend base URL
    pub relay_url: String,

    /// Previously issued relay session JWT; registers a new device if unset
    pub relay_token: Option<String>,

    /// Name this daemon registers under with the relay
    pub device_name: String,

    /// Verified token registry base URL
    pub token_list_url: String,

    /// Safe contract version used for the EIP-712 domain
    pub safe_version: SafeVersion,

    /// `validation` flag for plain (non-batch) simulations
    pub simulation_validation: bool,

    /// Gas limit and fee substituted into Safe transactions
    pub safe_gas: SafeGasDefaults,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_rpc =
            std::env::var("TXVERIFY_RPC_URL").unwrap_or_else(|_| "https://eth.llamarpc.com".into());
        let overrides = std::env::var("TXVERIFY_RPC_URLS").unwrap_or_default();
        let safe_fee = std::env::var("TXVERIFY_SAFE_MAX_FEE")
            .unwrap_or_else(|_| DEFAULT_SAFE_FEE_PER_GAS.into());

        Ok(Config {
            host: std::env::var("TXVERIFY_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("TXVERIFY_PORT")
                .unwrap_or_else(|_| "8547".into())
                .parse()
                .context("Invalid TXVERIFY_PORT")?,
            rpc: RpcEndpoints::new(default_rpc)
                .with_overrides(&overrides)
                .context("Invalid TXVERIFY_RPC_URLS")?,
            relay_url: std::env::var("TXVERIFY_RELAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".into()),
            relay_token: std::env::var("TXVERIFY_RELAY_TOKEN").ok().filter(|t| !t.is_empty()),
            device_name: std::env::var("TXVERIFY_DEVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_DEVICE_NAME.into()),
            token_list_url: std::env::var("TXVERIFY_TOKEN_LIST_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_LIST_URL.into()),
            safe_version: std::env::var("TXVERIFY_SAFE_VERSION")
                .unwrap_or_else(|_| "1.3.0".into())
                .parse()
                .context("Invalid TXVERIFY_SAFE_VERSION")?,
            simulation_validation: std::env::var("TXVERIFY_SIM_VALIDATION")
                .unwrap_or_else(|_| "false".into())
                .parse()
                .unwrap_or(false),
            safe_gas: SafeGasDefaults {
                gas_limit: std::env::var("TXVERIFY_SAFE_GAS_LIMIT")
                    .unwrap_or_else(|_| DEFAULT_SAFE_GAS_LIMIT.into()),
                max_fee_per_gas: safe_fee.clone(),
                max_priority_fee_per_gas: safe_fee,
            },
        })
    }

    pub fn rpc_url_for(&self, chain_id: &str) -> &str {
        self.rpc.url_for(chain_id)
    }
}

/// Node URL per chain, with a default for chains not listed.
#[derive(Debug, Clone)]
pub struct RpcEndpoints {
    default_url: String,
    per_chain: HashMap<u64, String>,
}

impl RpcEndpoints {
    pub fn new(default_url: impl Into<String>) -> Self {
        Self {
            default_url: default_url.into(),
            per_chain: HashMap::new(),
        }
    }

    pub fn with_chain(mut self, chain_id: u64, url: impl Into<String>) -> Self {
        self.per_chain.insert(chain_id, url.into());
        self
    }

    /// Parses `chainId=url` pairs separated by commas. Chain ids may be
    /// decimal or `0x` hex.
    pub fn with_overrides(mut self, pairs: &str) -> Result<Self> {
        for entry in pairs.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (chain, url) = entry
                .split_once('=')
                .with_context(|| format!("expected chainId=url, got `{entry}`"))?;
            let chain_id = parse_chain_id(chain.trim())
                .with_context(|| format!("invalid chain id `{chain}`"))?;
            self.per_chain.insert(chain_id, url.trim().to_string());
        }
        Ok(self)
    }

    pub fn url_for(&self, chain_id: &str) -> &str {
        parse_chain_id(chain_id)
            .and_then(|id| self.per_chain.get(&id))
            .map(String::as_str)
            .unwrap_or(&self.default_url)
    }
}

fn parse_chain_id(raw: &str) -> Option<u64> {
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
