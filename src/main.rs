use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use txverify::api::{build_router, AppState};
use txverify::cipher::{KeySlot, PayloadCipher};
use txverify::config::Config;
use txverify::events::EventInterpreter;
use txverify::hash::HashEngine;
use txverify::normalizer::TransactionNormalizer;
use txverify::relay::RelayClient;
use txverify::rpc::RpcClient;
use txverify::simulation::SimulationGateway;
use txverify::tokens::{RegistrySource, TokenInfoService};
use txverify::Reviewer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txverify=info")),
        )
        .init();

    let config = Config::from_env()?;
    let http = reqwest::Client::new();

    let tokens = TokenInfoService::new(RegistrySource::new(
        http.clone(),
        config.token_list_url.clone(),
        config.rpc.clone(),
    ));
    let simulator = SimulationGateway::new(RpcClient::new(http.clone()), config.rpc.clone())
        .with_validation(config.simulation_validation);

    let reviewer = Reviewer::new(
        PayloadCipher::new(Arc::new(KeySlot::new())),
        TransactionNormalizer::new(config.safe_gas.clone()),
        HashEngine::new(config.safe_version),
        Arc::new(simulator),
        EventInterpreter::new(Arc::new(tokens)),
    );
    let relay = RelayClient::new(http, config.relay_url.clone(), config.relay_token.clone())
        .with_device_name(config.device_name.clone());

    let router = build_router(Arc::new(AppState { reviewer, relay }));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %addr,
        safe_version = %config.safe_version,
        sim_validation = config.simulation_validation,
        "Review daemon listening"
    );
    axum::serve(listener, router).await.context("Server error")?;
    Ok(())
}
