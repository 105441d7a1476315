//! Rate-limited batch dispatch queue
//!
//! A single actor task owns the job queue, the nonce cache, and the backoff
//! state; a fixed-interval ticker caps submissions at the configured rate.
//! Transient provider failures (throttling, nonce races) retry at the head
//! of the queue; everything else rejects the job terminally.

use crate::chain::{ChainRpc, PriceSource};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult, ProviderErrorKind};
use crate::tx::gas::{self, GasEstimator};
use crate::tx::nonce::NonceCache;

use ethers::abi::Token;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Router entry point for batched units.
const BATCH_FUNCTION: &str = "executeBatch(uint256)";

/// Result of a dispatched batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub tx_hash: H256,
    /// Present when the transaction confirmed within the poll budget.
    pub receipt: Option<TransactionReceipt>,
    /// Submitted but unconfirmed; the transaction may still land.
    pub timed_out: bool,
}

struct BatchJob {
    unit_count: u32,
    enqueued_at: Instant,
    result_tx: oneshot::Sender<DispatchResult<BatchOutcome>>,
}

/// Handle to the dispatch actor.
pub struct BatchQueue {
    jobs_tx: mpsc::UnboundedSender<BatchJob>,
    depth: Arc<AtomicUsize>,
    max_units: u32,
}

impl BatchQueue {
    /// Spawn the dispatch actor and return its handle.
    pub fn start(
        rpc: Arc<dyn ChainRpc>,
        price: Arc<dyn PriceSource>,
        wallet: LocalWallet,
        router: Address,
        cfg: DispatcherConfig,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let max_units = cfg.max_units;

        let actor = DispatchActor {
            sender: wallet.address(),
            rpc,
            price,
            wallet,
            router,
            cfg,
            gas: GasEstimator::new(),
            jobs: VecDeque::new(),
            jobs_rx,
            nonce: NonceCache::new(),
            cooling_off_until: None,
            backoff: Duration::ZERO,
            depth: depth.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            jobs_tx,
            depth,
            max_units,
        }
    }

    /// Append a batch job and return its result future. Never blocks; the
    /// job is on the queue before this returns.
    pub fn enqueue(
        &self,
        unit_count: u32,
    ) -> impl Future<Output = DispatchResult<BatchOutcome>> + Send + 'static {
        let (result_tx, result_rx) = oneshot::channel();

        if unit_count == 0 {
            let _ = result_tx.send(Err(DispatchError::InvalidRequest(
                "batch unit count must be positive".to_string(),
            )));
        } else if unit_count > self.max_units {
            let _ = result_tx.send(Err(DispatchError::InvalidRequest(format!(
                "batch of {} units exceeds ceiling of {}",
                unit_count, self.max_units
            ))));
        } else {
            let job = BatchJob {
                unit_count,
                enqueued_at: Instant::now(),
                result_tx,
            };
            match self.jobs_tx.send(job) {
                Ok(()) => {
                    self.depth.fetch_add(1, Ordering::SeqCst);
                    crate::metrics::set_dispatch_queue_depth(self.depth.load(Ordering::SeqCst));
                }
                Err(rejected) => {
                    let _ = rejected.0.result_tx.send(Err(DispatchError::QueueClosed));
                }
            }
        }

        async move {
            match result_rx.await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::QueueClosed),
            }
        }
    }

    /// Jobs waiting for dispatch.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Owns all mutable queue state; nothing else touches it.
struct DispatchActor {
    rpc: Arc<dyn ChainRpc>,
    price: Arc<dyn PriceSource>,
    wallet: LocalWallet,
    sender: Address,
    router: Address,
    cfg: DispatcherConfig,
    gas: GasEstimator,
    jobs: VecDeque<BatchJob>,
    jobs_rx: mpsc::UnboundedReceiver<BatchJob>,
    nonce: NonceCache,
    cooling_off_until: Option<Instant>,
    backoff: Duration,
    depth: Arc<AtomicUsize>,
}

impl DispatchActor {
    async fn run(mut self) {
        let period = Duration::from_millis(1_000 / u64::from(self.cfg.rate_per_second.max(1)));
        let mut ticker = interval(period);
        // A slow dispatch must not be followed by a catch-up burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut closed = false;
        loop {
            tokio::select! {
                maybe_job = self.jobs_rx.recv(), if !closed => {
                    match maybe_job {
                        Some(job) => self.jobs.push_back(job),
                        None => closed = true,
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }

            if closed && self.jobs.is_empty() {
                break;
            }
        }
        debug!("dispatch actor stopped");
    }

    async fn tick(&mut self) {
        // Pull everything already enqueued so this tick sees the true tail.
        while let Ok(job) = self.jobs_rx.try_recv() {
            self.jobs.push_back(job);
        }

        // The cooling-off gate applies to every job, not just the one that
        // triggered it.
        if let Some(until) = self.cooling_off_until {
            if Instant::now() < until {
                return;
            }
            self.cooling_off_until = None;
        }

        let Some(job) = self.jobs.pop_front() else {
            return;
        };
        self.depth.fetch_sub(1, Ordering::SeqCst);
        crate::metrics::set_dispatch_queue_depth(self.depth.load(Ordering::SeqCst));

        match self.dispatch(job.unit_count).await {
            Ok(outcome) => {
                if outcome.receipt.is_some() {
                    self.backoff = Duration::ZERO;
                    crate::metrics::set_backoff_ms(0);
                    crate::metrics::record_batch_confirmed(job.enqueued_at.elapsed());
                } else {
                    crate::metrics::record_batch_timeout();
                }
                let _ = job.result_tx.send(Ok(outcome));
            }
            Err(err) => match err.provider_kind() {
                ProviderErrorKind::RateLimited => {
                    self.backoff = if self.backoff.is_zero() {
                        Duration::from_millis(self.cfg.backoff_seed_ms)
                    } else {
                        (self.backoff * 2).min(Duration::from_millis(self.cfg.backoff_cap_ms))
                    };
                    self.cooling_off_until = Some(Instant::now() + self.backoff);
                    warn!(
                        backoff_ms = self.backoff.as_millis() as u64,
                        "provider rate limit, cooling off: {err}"
                    );
                    crate::metrics::record_rate_limit_hit();
                    crate::metrics::set_backoff_ms(self.backoff.as_millis() as u64);
                    self.requeue_front(job);
                }
                ProviderErrorKind::SequencingConflict => {
                    warn!("sequencing conflict, nonce cache invalidated: {err}");
                    crate::metrics::record_nonce_conflict();
                    self.nonce.invalidate();
                    self.requeue_front(job);
                }
                ProviderErrorKind::Other => {
                    warn!(unit_count = job.unit_count, "batch dispatch failed: {err}");
                    crate::metrics::record_batch_failed();
                    let _ = job.result_tx.send(Err(err));
                }
            },
        }
    }

    /// Undo a dequeue so the failed job is retried before any newer job.
    fn requeue_front(&mut self, job: BatchJob) {
        self.jobs.push_front(job);
        self.depth.fetch_add(1, Ordering::SeqCst);
        crate::metrics::set_dispatch_queue_depth(self.depth.load(Ordering::SeqCst));
    }

    async fn dispatch(&mut self, unit_count: u32) -> DispatchResult<BatchOutcome> {
        let unit_price = match self.price.unit_price().await {
            Ok(price) => price,
            Err(err) => {
                warn!("unit price fetch failed, using fallback formula: {err}");
                let base_fee = self.rpc.base_fee().await?;
                gas::fallback_unit_price(base_fee, self.cfg.fee_multiplier_bps)
            }
        };

        if self.nonce.cached().is_none() {
            let fetched = self.rpc.pending_nonce(self.sender).await?;
            debug!(nonce = fetched, "primed nonce cache from chain");
            self.nonce.prime(fetched);
        }
        let nonce = match self.nonce.cached() {
            Some(nonce) => nonce,
            None => {
                return Err(DispatchError::Internal(
                    "nonce cache empty after prime".to_string(),
                ))
            }
        };
        self.nonce.advance();

        let result = self.submit_and_confirm(unit_count, unit_price, nonce).await;
        if result.is_err() {
            // The chain never saw this nonce; the retry must reuse it.
            self.nonce.release(nonce);
        }
        result
    }

    async fn submit_and_confirm(
        &mut self,
        unit_count: u32,
        unit_price: U256,
        nonce: u64,
    ) -> DispatchResult<BatchOutcome> {
        let fees = self.rpc.fee_estimate().await?;
        let value = gas::batch_value(unit_price, unit_count);

        let request = Eip1559TransactionRequest::new()
            .to(self.router)
            .data(batch_call_data(unit_count))
            .value(value)
            .nonce(nonce)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
            .chain_id(self.rpc.chain_id());

        let probe = TypedTransaction::Eip1559(request.clone());
        let gas_limit = self
            .gas
            .batch_gas(self.rpc.as_ref(), &probe, unit_count)
            .await;
        let tx = TypedTransaction::Eip1559(request.gas(gas_limit));

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| DispatchError::Wallet(e.to_string()))?;
        let tx_hash = self.rpc.send_raw(tx.rlp_signed(&signature)).await?;
        info!(%tx_hash, unit_count, nonce, %value, "batch submitted");
        crate::metrics::record_batch_submitted(unit_count);

        let poll_interval = Duration::from_millis(self.cfg.receipt_poll_interval_ms);
        for attempt in 0..self.cfg.receipt_poll_attempts {
            sleep(poll_interval).await;
            match self.rpc.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(%tx_hash, attempt, "batch confirmed");
                    return Ok(BatchOutcome {
                        tx_hash,
                        receipt: Some(receipt),
                        timed_out: false,
                    });
                }
                Ok(None) => {}
                // Lookup failures count as "no receipt yet", never as a
                // failed dispatch; the transaction is already out.
                Err(err) => debug!(attempt, "receipt lookup failed: {err}"),
            }
        }

        warn!(%tx_hash, "confirmation timed out, resolving unconfirmed");
        Ok(BatchOutcome {
            tx_hash,
            receipt: None,
            timed_out: true,
        })
    }
}

fn batch_call_data(unit_count: u32) -> Bytes {
    let selector = ethers::utils::id(BATCH_FUNCTION);
    let mut data = selector.to_vec();
    data.extend(ethers::abi::encode(&[Token::Uint(U256::from(unit_count))]));
    data.into()
}
