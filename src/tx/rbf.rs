//! Replace-by-fee retry loop for latency-sensitive single actions
//!
//! One action, one nonce: the transaction is resubmitted at the same
//! sequence number with escalating fees until a receipt appears or the
//! caller's deadline elapses.

use crate::chain::{ChainRpc, FeeEstimate};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::tx::gas::{self, GasEstimator};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Single on-chain action to push through before a deadline.
#[derive(Debug, Clone)]
pub struct RbfRequest {
    pub to: Address,
    pub value: U256,
    pub data: Option<Bytes>,
    /// Zero means the configured default; values above the maximum clamp.
    pub deadline: Duration,
}

/// Terminal success of an RBF send.
#[derive(Debug, Clone)]
pub struct RbfOutcome {
    pub tx_hash: H256,
    /// Wall-clock time from the first submission attempt to the receipt.
    pub latency: Duration,
    pub attempts: u32,
}

/// Fired once, when the first submission is accepted.
pub type OnHash = Box<dyn FnOnce(H256) + Send>;

pub struct RbfSender {
    rpc: Arc<dyn ChainRpc>,
    wallet: LocalWallet,
    gas: GasEstimator,
    poll_interval: Duration,
    escalation_interval: Duration,
    deadline_default: Duration,
    deadline_max: Duration,
}

impl RbfSender {
    pub fn new(rpc: Arc<dyn ChainRpc>, wallet: LocalWallet, cfg: &DispatcherConfig) -> Self {
        Self {
            rpc,
            wallet,
            gas: GasEstimator::new(),
            poll_interval: Duration::from_millis(cfg.rbf_poll_interval_ms),
            escalation_interval: Duration::from_millis(cfg.rbf_escalation_interval_ms),
            deadline_default: Duration::from_millis(cfg.deadline_default_ms),
            deadline_max: Duration::from_millis(cfg.deadline_max_ms),
        }
    }

    /// Submit at a fixed nonce, escalating fees each round, until a receipt
    /// appears or the deadline elapses.
    pub async fn send(
        &self,
        req: RbfRequest,
        on_hash: Option<OnHash>,
    ) -> DispatchResult<RbfOutcome> {
        let deadline = if req.deadline.is_zero() {
            self.deadline_default
        } else {
            req.deadline.min(self.deadline_max)
        };

        // Nonce and starting fees are fixed once for the whole sequence.
        let nonce = self.rpc.pending_nonce(self.wallet.address()).await?;
        let mut fees = self.rpc.fee_estimate().await?;

        let probe = self.build_tx(&req, nonce, &fees, U256::from(21_000u64));
        let gas_limit = self.gas.action_gas(self.rpc.as_ref(), &probe).await;

        crate::metrics::record_rbf_send();
        let start = Instant::now();
        let hard_deadline = start + deadline;
        let mut sent_hash: Option<H256> = None;
        let mut attempts = 0u32;
        let mut on_hash = on_hash;

        loop {
            attempts += 1;
            let tx = self.build_tx(&req, nonce, &fees, gas_limit);
            match self.sign_and_submit(&tx).await {
                Ok(hash) => {
                    // Later replacements at the same nonce supersede this
                    // transaction, so only the first accepted hash is tracked.
                    if sent_hash.is_none() {
                        info!(%hash, nonce, "action submitted");
                        sent_hash = Some(hash);
                        if let Some(cb) = on_hash.take() {
                            cb(hash);
                        }
                    }
                }
                Err(err) => {
                    debug!(
                        attempt = attempts,
                        nonce, "resubmission rejected, continuing: {err}"
                    );
                }
            }

            let round_end =
                std::cmp::min(hard_deadline, Instant::now() + self.escalation_interval);
            if let Some(hash) = sent_hash {
                while Instant::now() < round_end {
                    if let Ok(Some(_receipt)) = self.rpc.receipt(hash).await {
                        let latency = start.elapsed();
                        info!(
                            %hash,
                            attempts,
                            latency_ms = latency.as_millis() as u64,
                            "action confirmed"
                        );
                        crate::metrics::record_rbf_confirmed(latency);
                        return Ok(RbfOutcome {
                            tx_hash: hash,
                            latency,
                            attempts,
                        });
                    }
                    sleep(self.poll_interval).await;
                }
            } else {
                sleep_until(round_end).await;
            }

            if Instant::now() >= hard_deadline {
                warn!(?sent_hash, attempts, "action abandoned past deadline");
                crate::metrics::record_rbf_deadline_exceeded();
                return Err(DispatchError::DeadlineExceeded {
                    attempts,
                    last_hash: sent_hash,
                });
            }

            fees.max_fee_per_gas = gas::escalate_fee(fees.max_fee_per_gas);
            fees.max_priority_fee_per_gas = gas::escalate_fee(fees.max_priority_fee_per_gas);
            crate::metrics::record_fee_escalation();
            debug!(
                attempt = attempts,
                max_fee = %fees.max_fee_per_gas,
                "escalating fees, resubmitting at same nonce"
            );
        }
    }

    fn build_tx(
        &self,
        req: &RbfRequest,
        nonce: u64,
        fees: &FeeEstimate,
        gas_limit: U256,
    ) -> TypedTransaction {
        let mut tx = Eip1559TransactionRequest::new()
            .to(req.to)
            .value(req.value)
            .nonce(nonce)
            .gas(gas_limit)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
            .chain_id(self.rpc.chain_id());
        if let Some(data) = &req.data {
            tx = tx.data(data.clone());
        }
        TypedTransaction::Eip1559(tx)
    }

    async fn sign_and_submit(&self, tx: &TypedTransaction) -> DispatchResult<H256> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| DispatchError::Wallet(e.to_string()))?;
        self.rpc.send_raw(tx.rlp_signed(&signature)).await
    }
}
