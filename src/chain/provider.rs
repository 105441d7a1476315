//! Chain provider with multi-RPC support and automatic failover

use super::{ChainRpc, FeeEstimate, PriceSource};
use crate::config::ChainConfig;
use crate::error::{DispatchError, DispatchResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> DispatchResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DispatchError::Config(
                "No valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("RPC failover to provider {}", next);
    }

    /// Latest block, rotating through providers on failure.
    async fn latest_block(&self) -> DispatchResult<Block<H256>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(BlockNumber::Latest).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {
                    return Err(DispatchError::Provider("no latest block".to_string()))
                }
                Err(e) => {
                    warn!("Failed to get latest block: {}", e);
                    self.failover();
                }
            }
        }

        Err(DispatchError::Provider(
            "all providers failed to get latest block".to_string(),
        ))
    }

    /// Cap a fee at the configured per-gas ceiling.
    fn capped(&self, fee: U256) -> U256 {
        let max = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        std::cmp::min(fee, max)
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    async fn fee_estimate(&self) -> DispatchResult<FeeEstimate> {
        let block = self.latest_block().await?;

        match block.base_fee_per_gas {
            Some(base_fee) => {
                // Priority fee estimation (can be improved with fee history)
                let priority_fee = U256::from(2_000_000_000u64); // 2 gwei default

                // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
                let max_fee = self.capped(base_fee * 2 + priority_fee);

                Ok(FeeEstimate {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
            None => {
                // Pre-1559 chain: single legacy gas price, nominal priority
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| DispatchError::Provider(e.to_string()))?;
                Ok(FeeEstimate {
                    max_fee_per_gas: self.capped(price),
                    max_priority_fee_per_gas: U256::one(),
                })
            }
        }
    }

    async fn base_fee(&self) -> DispatchResult<U256> {
        let block = self.latest_block().await?;
        block
            .base_fee_per_gas
            .ok_or_else(|| DispatchError::Provider("no base fee in block".to_string()))
    }

    async fn pending_nonce(&self, address: Address) -> DispatchResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(nonce) => return Ok(nonce.as_u64()),
                Err(e) => {
                    warn!("Failed to fetch pending nonce: {}", e);
                    self.failover();
                }
            }
        }

        Err(DispatchError::Provider(
            "all providers failed to fetch nonce".to_string(),
        ))
    }

    async fn send_raw(&self, raw: Bytes) -> DispatchResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| DispatchError::Provider(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, hash: H256) -> DispatchResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| DispatchError::Provider(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DispatchResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| DispatchError::GasEstimation(e.to_string()))
    }

    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }
}

/// Reads the unit price off the target contract's `unitPrice()` view.
///
/// The batch router forwards exactly this price per unit, so the dispatch
/// queue must match it rather than recompute it.
pub struct ContractPriceSource {
    provider: Arc<ChainProvider>,
    target: Address,
}

impl ContractPriceSource {
    pub fn new(provider: Arc<ChainProvider>, target: Address) -> Self {
        Self { provider, target }
    }
}

#[async_trait]
impl PriceSource for ContractPriceSource {
    async fn unit_price(&self) -> DispatchResult<U256> {
        let selector = ethers::utils::id("unitPrice()");
        let call = Eip1559TransactionRequest::new()
            .to(self.target)
            .data(Bytes::from(selector.to_vec()));
        let tx = TypedTransaction::Eip1559(call);

        let out = self
            .provider
            .http()
            .call(&tx, None)
            .await
            .map_err(|e| DispatchError::Provider(e.to_string()))?;

        if out.len() < 32 {
            return Err(DispatchError::Provider(format!(
                "short unitPrice() response: {} bytes",
                out.len()
            )));
        }
        Ok(U256::from_big_endian(&out[..32]))
    }
}
