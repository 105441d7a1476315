//! Chain module - RPC collaborator contracts and the HTTP provider
//!
//! This module provides:
//! - The `ChainRpc` seam the dispatch pipeline submits and polls through
//! - The `PriceSource` seam for the current unit price
//! - Multi-RPC provider management with automatic failover

pub mod provider;

pub use provider::{ChainProvider, ContractPriceSource};

use crate::error::DispatchResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Fee suggestion for an EIP-1559 submission.
///
/// When the chain reports no priority-fee data the provider falls back to a
/// single legacy gas price as the max fee and 1 wei priority.
#[derive(Debug, Clone, Copy)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Chain RPC operations the dispatch pipeline depends on.
///
/// Every suspension point in the pipeline goes through this trait, which is
/// what makes the queue and retry loops testable against a scripted fake.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current fee suggestion.
    async fn fee_estimate(&self) -> DispatchResult<FeeEstimate>;

    /// Base fee of the latest block.
    async fn base_fee(&self) -> DispatchResult<U256>;

    /// Next usable sequence number for `address`, including mempool entries.
    async fn pending_nonce(&self, address: Address) -> DispatchResult<u64>;

    /// Submit a signed raw transaction, returning its hash.
    async fn send_raw(&self, raw: Bytes) -> DispatchResult<H256>;

    /// Look up a receipt; `None` means not yet included.
    async fn receipt(&self, hash: H256) -> DispatchResult<Option<TransactionReceipt>>;

    /// Best-effort gas estimate for a call.
    async fn estimate_gas(&self, tx: &TypedTransaction) -> DispatchResult<U256>;

    fn chain_id(&self) -> u64;
}

/// Source of the price per unit of work, in wei.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// May fail; the dispatch queue falls back to a locally computed price.
    async fn unit_price(&self) -> DispatchResult<U256>;
}
