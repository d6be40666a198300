//! Token and chain display metadata.
//!
//! [`TokenInfoService`] is an explicitly constructed cache in front of any
//! [`TokenResolver`]. [`RegistrySource`] is the networked resolver: verified
//! registry first, then on-chain ERC-20 calls. When both come up empty the
//! lookup fails and callers fall back to [`TokenInfo::unknown`], which is
//! never cached.

use crate::config::RpcEndpoints;
use crate::error::MetadataResolutionError;
use crate::rpc::RpcClient;

use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Address `eth_simulateV1` uses for native-currency transfers.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

pub const UNVERIFIED_TOKEN_WARNING: &str = "This token is not verified, use at your own risk";
pub const UNKNOWN_TOKEN_WARNING: &str = "Unknown token - verify contract address";

sol! {
    function symbol() returns (string);
    function decimals() returns (uint8);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub chain_id: String,
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Set when the descriptor did not come from the verified registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl TokenInfo {
    /// Placeholder used when nothing is known about a token.
    pub fn unknown(chain_id: &str, address: &str) -> Self {
        let short = abbreviate_address(address);
        Self {
            chain_id: chain_id.to_string(),
            address: address.to_lowercase(),
            name: format!("Token {short}"),
            symbol: short,
            decimals: 18,
            icon: None,
            warning: Some(UNKNOWN_TOKEN_WARNING.into()),
        }
    }

    fn native(chain: &ChainInfo) -> Self {
        Self {
            chain_id: chain.chain_id.clone(),
            address: NATIVE_TOKEN_ADDRESS.into(),
            name: chain.name.clone(),
            symbol: chain.symbol.clone(),
            decimals: 18,
            icon: chain.icon.clone(),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub chain_id: String,
    pub name: String,
    /// Native currency symbol.
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ChainInfo {
    pub fn new(chain_id: &str, name: &str, symbol: &str) -> Self {
        Self {
            chain_id: chain_id.into(),
            name: name.into(),
            symbol: symbol.into(),
            icon: None,
        }
    }
}

/// `0x1234...abcd`
pub fn abbreviate_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve_token(
        &self,
        chain_id: &str,
        address: &str,
    ) -> Result<TokenInfo, MetadataResolutionError>;

    async fn resolve_chain(&self, chain_id: &str) -> Result<ChainInfo, MetadataResolutionError>;
}

// ── Cache ───────────────────────────────────────────────────────

/// Caches successful lookups by `(chainId, lowercase address)`. Failures
/// are not cached so a later review can retry them.
pub struct TokenInfoService<S> {
    source: S,
    tokens: RwLock<HashMap<(String, String), TokenInfo>>,
    chains: RwLock<HashMap<String, ChainInfo>>,
}

impl<S: TokenResolver> TokenInfoService<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            tokens: RwLock::new(HashMap::new()),
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.clear();
        }
        if let Ok(mut chains) = self.chains.write() {
            chains.clear();
        }
    }

    pub fn cached_tokens(&self) -> usize {
        self.tokens.read().map(|t| t.len()).unwrap_or(0)
    }

    fn cached_token(&self, key: &(String, String)) -> Option<TokenInfo> {
        self.tokens.read().ok().and_then(|t| t.get(key).cloned())
    }
}

#[async_trait]
impl<S: TokenResolver> TokenResolver for TokenInfoService<S> {
    async fn resolve_token(
        &self,
        chain_id: &str,
        address: &str,
    ) -> Result<TokenInfo, MetadataResolutionError> {
        let address = address.to_lowercase();
        if address == NATIVE_TOKEN_ADDRESS {
            let chain = self.resolve_chain(chain_id).await?;
            return Ok(TokenInfo::native(&chain));
        }

        let key = (chain_id.to_string(), address);
        if let Some(hit) = self.cached_token(&key) {
            return Ok(hit);
        }

        let info = self.source.resolve_token(chain_id, &key.1).await?;
        // Placeholders are answers to a failed lookup, so they are retried.
        if info.warning.as_deref() == Some(UNKNOWN_TOKEN_WARNING) {
            return Ok(info);
        }
        // Idempotent insert; concurrent lookups of the same token agree.
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(key, info.clone());
        }
        Ok(info)
    }

    async fn resolve_chain(&self, chain_id: &str) -> Result<ChainInfo, MetadataResolutionError> {
        if let Some(hit) = self.chains.read().ok().and_then(|c| c.get(chain_id).cloned()) {
            return Ok(hit);
        }
        let info = self.source.resolve_chain(chain_id).await?;
        if let Ok(mut chains) = self.chains.write() {
            chains.insert(chain_id.to_string(), info.clone());
        }
        Ok(info)
    }
}

// ── Sources ─────────────────────────────────────────────────────

/// Registry entry as published by the verified token list.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    name: String,
    symbol: String,
    decimals: u8,
    #[serde(default)]
    logo: Option<RegistryLogo>,
}

#[derive(Debug, Deserialize)]
struct RegistryLogo {
    src: Option<String>,
}

pub struct RegistrySource {
    http: reqwest::Client,
    registry_url: String,
    rpc: RpcClient,
    endpoints: RpcEndpoints,
    chains: HashMap<u64, ChainInfo>,
}

impl RegistrySource {
    pub fn new(
        http: reqwest::Client,
        registry_url: impl Into<String>,
        endpoints: RpcEndpoints,
    ) -> Self {
        let chains = [
            (1, "Ethereum", "ETH"),
            (10, "Optimism", "ETH"),
            (56, "BNB Smart Chain", "BNB"),
            (100, "Gnosis", "XDAI"),
            (137, "Polygon", "POL"),
            (8453, "Base", "ETH"),
            (42161, "Arbitrum One", "ETH"),
            (11155111, "Sepolia", "ETH"),
        ]
        .into_iter()
        .map(|(id, name, symbol)| (id, ChainInfo::new(&format!("{id:#x}"), name, symbol)))
        .collect();

        Self {
            rpc: RpcClient::new(http.clone()),
            http,
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            endpoints,
            chains,
        }
    }

    async fn from_registry(&self, chain_id: &str, address: &str) -> Option<TokenInfo> {
        let url = format!("{}/{}/{}.json", self.registry_url, chain_number(chain_id)?, address);
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            debug!(token = %address, status = resp.status().as_u16(), "Token not in registry");
            return None;
        }
        let entry: RegistryEntry = resp.json().await.ok()?;
        Some(TokenInfo {
            chain_id: chain_id.to_string(),
            address: address.to_string(),
            name: entry.name,
            symbol: entry.symbol.to_uppercase(),
            decimals: entry.decimals,
            icon: entry.logo.and_then(|logo| logo.src),
            warning: None,
        })
    }

    async fn from_chain(&self, chain_id: &str, address: &str) -> Option<TokenInfo> {
        let symbol = self.eth_call(chain_id, address, symbolCall {}).await?._0;
        let decimals = self.eth_call(chain_id, address, decimalsCall {}).await?._0;
        Some(TokenInfo {
            chain_id: chain_id.to_string(),
            address: address.to_string(),
            name: symbol.clone(),
            symbol,
            decimals,
            icon: None,
            warning: Some(UNVERIFIED_TOKEN_WARNING.into()),
        })
    }

    async fn eth_call<C: SolCall + Send>(
        &self,
        chain_id: &str,
        address: &str,
        call: C,
    ) -> Option<C::Return> {
        let data = format!("0x{}", hex::encode(call.abi_encode()));
        let resp = self
            .rpc
            .call(
                self.endpoints.url_for(chain_id),
                "eth_call",
                json!([{ "to": address, "data": data }, "latest"]),
            )
            .await
            .ok()?;
        let raw = resp.result?.as_str().map(str::to_owned)?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).ok()?;
        C::abi_decode_returns(&bytes, true).ok()
    }
}

#[async_trait]
impl TokenResolver for RegistrySource {
    async fn resolve_token(
        &self,
        chain_id: &str,
        address: &str,
    ) -> Result<TokenInfo, MetadataResolutionError> {
        if let Some(info) = self.from_registry(chain_id, address).await {
            return Ok(info);
        }
        if let Some(info) = self.from_chain(chain_id, address).await {
            info!(token = %address, chain_id, "Token metadata read from contract; unverified");
            return Ok(info);
        }
        warn!(token = %address, chain_id, "Token metadata unavailable from registry and chain");
        Err(MetadataResolutionError {
            chain_id: chain_id.to_string(),
            address: address.to_string(),
            reason: "not in registry and no ERC-20 metadata on chain".into(),
        })
    }

    async fn resolve_chain(&self, chain_id: &str) -> Result<ChainInfo, MetadataResolutionError> {
        chain_number(chain_id)
            .and_then(|id| self.chains.get(&id))
            .cloned()
            .ok_or_else(|| MetadataResolutionError {
                chain_id: chain_id.to_string(),
                address: NATIVE_TOKEN_ADDRESS.into(),
                reason: "unsupported chain".into(),
            })
    }
}

fn chain_number(chain_id: &str) -> Option<u64> {
    u64::from_str_radix(chain_id.trim_start_matches("0x"), 16).ok()
}

/// Fixed table, for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    tokens: HashMap<(String, String), TokenInfo>,
    chains: HashMap<String, ChainInfo>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, info: TokenInfo) -> Self {
        self.tokens
            .insert((info.chain_id.clone(), info.address.to_lowercase()), info);
        self
    }

    pub fn with_chain(mut self, info: ChainInfo) -> Self {
        self.chains.insert(info.chain_id.clone(), info);
        self
    }
}

#[async_trait]
impl TokenResolver for StaticSource {
    async fn resolve_token(
        &self,
        chain_id: &str,
        address: &str,
    ) -> Result<TokenInfo, MetadataResolutionError> {
        self.tokens
            .get(&(chain_id.to_string(), address.to_lowercase()))
            .cloned()
            .ok_or_else(|| MetadataResolutionError {
                chain_id: chain_id.to_string(),
                address: address.to_string(),
                reason: "not in table".into(),
            })
    }

    async fn resolve_chain(&self, chain_id: &str) -> Result<ChainInfo, MetadataResolutionError> {
        self.chains.get(chain_id).cloned().ok_or_else(|| MetadataResolutionError {
            chain_id: chain_id.to_string(),
            address: NATIVE_TOKEN_ADDRESS.into(),
            reason: "not in table".into(),
        })
    }
}
