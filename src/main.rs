//! Burst Relayer - rate-limited on-chain action dispatch service
//!
//! Accepts units of work over HTTP, coalesces them into capped batches, and
//! dispatches them through a rate-limited queue with automatic recovery from
//! provider throttling and nonce races. Single latency-sensitive actions go
//! through a fee-escalating retry loop bounded to one in flight.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use futures::FutureExt;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use burst_relayer::api;
use burst_relayer::chain::{ChainProvider, ChainRpc, ContractPriceSource, PriceSource};
use burst_relayer::config::Settings;
use burst_relayer::metrics::MetricsServer;
use burst_relayer::tx::{AdmissionQueue, BatchQueue, Coalescer, RbfSender, SubmitBatchFn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Burst Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} ({} RPC endpoints)",
        settings.chain.chain_id,
        settings.chain.rpc_urls.len()
    );

    // Wallet for the dispatch account
    let wallet = load_wallet(&settings)?;
    info!("Dispatch wallet: {:?}", wallet.address());

    // Chain provider with failover
    let provider = Arc::new(ChainProvider::new(settings.chain.clone())?);
    let rpc: Arc<dyn ChainRpc> = provider.clone();
    info!("Chain provider initialized");

    // Unit price comes from the target contract; the queue falls back to a
    // local formula when the call fails
    let target = settings
        .chain
        .target_address
        .parse()
        .context("invalid target address")?;
    let price: Arc<dyn PriceSource> = Arc::new(ContractPriceSource::new(provider.clone(), target));

    // Batch dispatch queue
    let router = settings
        .chain
        .router_address
        .parse()
        .context("invalid router address")?;
    let queue = Arc::new(BatchQueue::start(
        rpc.clone(),
        price,
        wallet.clone(),
        router,
        settings.dispatcher.clone(),
    ));
    info!(
        "Dispatch queue started ({}/s, batch cap {})",
        settings.dispatcher.rate_per_second, settings.dispatcher.max_units
    );

    // Coalescer feeding the queue
    let submit: SubmitBatchFn = {
        let queue = queue.clone();
        Arc::new(move |units| {
            let result = queue.enqueue(units);
            tokio::spawn(async move {
                match result.await {
                    Ok(outcome) if outcome.timed_out => {
                        warn!(tx_hash = ?outcome.tx_hash, units, "batch unconfirmed at timeout")
                    }
                    Ok(outcome) => {
                        info!(tx_hash = ?outcome.tx_hash, units, "batch confirmed")
                    }
                    Err(err) => error!(units, "batch failed: {err}"),
                }
            });
            futures::future::ready(()).boxed()
        })
    };
    let coalescer = Arc::new(Coalescer::new(
        settings.dispatcher.window_ms,
        settings.dispatcher.max_units,
        submit,
    ));

    // Single-flight RBF path
    let rbf = Arc::new(RbfSender::new(rpc, wallet, &settings.dispatcher));
    let admission = Arc::new(AdmissionQueue::new(settings.dispatcher.max_in_flight_sends));

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let coalescer = coalescer.clone();
        let queue = queue.clone();
        let admission = admission.clone();
        let rbf = rbf.clone();
        async move {
            if let Err(e) = api::run_server(api_config, coalescer, queue, admission, rbf).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Burst Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Burst Relayer stopped");
    Ok(())
}

/// Load the dispatch wallet from the configured environment variable
fn load_wallet(settings: &Settings) -> Result<LocalWallet> {
    let var_name = settings
        .wallet
        .private_key_env
        .clone()
        .unwrap_or_else(|| "BURST_PRIVATE_KEY".to_string());

    let key = env::var(&var_name)
        .with_context(|| format!("No wallet configured. Set {}", var_name))?;

    let wallet: LocalWallet = key.parse().context("Invalid private key")?;
    Ok(wallet.with_chain_id(settings.chain.chain_id))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,burst_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
