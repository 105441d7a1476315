//! Scripted in-memory chain RPC for pipeline tests

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use burst_relayer::chain::{ChainRpc, FeeEstimate, PriceSource};
use burst_relayer::error::{DispatchError, DispatchResult};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

pub const TEST_CHAIN_ID: u64 = 6342;

/// Hardhat's well-known second test key; never holds real funds.
pub fn test_wallet() -> LocalWallet {
    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"
        .parse::<LocalWallet>()
        .unwrap()
        .with_chain_id(TEST_CHAIN_ID)
}

/// How the mock answers receipt lookups for accepted transactions.
pub enum ReceiptMode {
    /// A hash confirms once it has been looked up this many times.
    AfterPolls(usize),
    /// No receipt ever appears.
    Never,
}

pub struct MockRpc {
    pub chain_nonce: AtomicU64,
    pub nonce_fetches: AtomicUsize,
    /// Scripted outcome per send_raw call; once exhausted, submissions
    /// succeed.
    pub submit_script: Mutex<VecDeque<Result<(), String>>>,
    /// Every submission attempt (accepted or rejected), with its virtual
    /// timestamp.
    pub submissions: Mutex<Vec<(Instant, Bytes)>>,
    /// Hashes of accepted submissions, in order.
    pub accepted: Mutex<Vec<H256>>,
    pub receipt_mode: ReceiptMode,
    pub receipt_polls: AtomicUsize,
    per_hash_polls: Mutex<HashMap<H256, usize>>,
    pub base_fee: U256,
    pub fees: FeeEstimate,
    /// None makes estimate_gas fail, forcing the fixed-formula fallback.
    pub gas_estimate: Option<U256>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            chain_nonce: AtomicU64::new(7),
            nonce_fetches: AtomicUsize::new(0),
            submit_script: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            accepted: Mutex::new(Vec::new()),
            receipt_mode: ReceiptMode::AfterPolls(1),
            receipt_polls: AtomicUsize::new(0),
            per_hash_polls: Mutex::new(HashMap::new()),
            base_fee: U256::from(100u64),
            fees: FeeEstimate {
                max_fee_per_gas: U256::from(2_000u64),
                max_priority_fee_per_gas: U256::from(100u64),
            },
            gas_estimate: Some(U256::from(500_000u64)),
        }
    }

    pub fn with_submit_script(self, script: Vec<Result<(), String>>) -> Self {
        *self.submit_script.lock().unwrap() = script.into();
        self
    }

    pub fn with_receipt_mode(mut self, mode: ReceiptMode) -> Self {
        self.receipt_mode = mode;
        self
    }

    pub fn without_gas_estimation(mut self) -> Self {
        self.gas_estimate = None;
        self
    }

    pub fn decoded_submissions(&self) -> Vec<TypedTransaction> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, raw)| decode_tx(raw))
            .collect()
    }

    pub fn submission_times(&self) -> Vec<Instant> {
        self.submissions.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn accepted_hashes(&self) -> Vec<H256> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn fee_estimate(&self) -> DispatchResult<FeeEstimate> {
        Ok(self.fees)
    }

    async fn base_fee(&self) -> DispatchResult<U256> {
        Ok(self.base_fee)
    }

    async fn pending_nonce(&self, _address: Address) -> DispatchResult<u64> {
        self.nonce_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain_nonce.load(Ordering::SeqCst))
    }

    async fn send_raw(&self, raw: Bytes) -> DispatchResult<H256> {
        self.submissions
            .lock()
            .unwrap()
            .push((Instant::now(), raw.clone()));

        let scripted = self.submit_script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(message)) => Err(DispatchError::Provider(message)),
            _ => {
                let hash = H256::from(keccak256(raw.as_ref()));
                self.accepted.lock().unwrap().push(hash);
                Ok(hash)
            }
        }
    }

    async fn receipt(&self, hash: H256) -> DispatchResult<Option<TransactionReceipt>> {
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);

        let polls = {
            let mut counts = self.per_hash_polls.lock().unwrap();
            let entry = counts.entry(hash).or_insert(0);
            *entry += 1;
            *entry
        };

        match self.receipt_mode {
            ReceiptMode::Never => Ok(None),
            ReceiptMode::AfterPolls(threshold) => {
                if polls >= threshold && self.accepted.lock().unwrap().contains(&hash) {
                    let receipt = TransactionReceipt {
                        transaction_hash: hash,
                        status: Some(1u64.into()),
                        ..Default::default()
                    };
                    Ok(Some(receipt))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> DispatchResult<U256> {
        match self.gas_estimate {
            Some(gas) => Ok(gas),
            None => Err(DispatchError::GasEstimation(
                "execution reverted".to_string(),
            )),
        }
    }

    fn chain_id(&self) -> u64 {
        TEST_CHAIN_ID
    }
}

pub struct MockPrice {
    price: Option<U256>,
}

impl MockPrice {
    pub fn fixed(price: u64) -> Self {
        Self {
            price: Some(U256::from(price)),
        }
    }

    pub fn failing() -> Self {
        Self { price: None }
    }
}

#[async_trait]
impl PriceSource for MockPrice {
    async fn unit_price(&self) -> DispatchResult<U256> {
        match self.price {
            Some(price) => Ok(price),
            None => Err(DispatchError::Provider(
                "price endpoint unavailable".to_string(),
            )),
        }
    }
}

/// Decode a signed raw transaction back into its request fields.
pub fn decode_tx(raw: &Bytes) -> TypedTransaction {
    let rlp = ethers::utils::rlp::Rlp::new(raw.as_ref());
    let (tx, _signature) = TypedTransaction::decode_signed(&rlp).expect("decodable signed tx");
    tx
}

/// Unit count carried in a batch call's data.
pub fn units_of(tx: &TypedTransaction) -> u64 {
    let data = tx.data().expect("batch tx has call data");
    U256::from_big_endian(&data[4..]).as_u64()
}

/// Max fee of an EIP-1559 transaction.
pub fn max_fee_of(tx: &TypedTransaction) -> U256 {
    match tx {
        TypedTransaction::Eip1559(inner) => inner.max_fee_per_gas.expect("max fee set"),
        other => panic!("expected EIP-1559 transaction, got {:?}", other),
    }
}

/// Priority fee of an EIP-1559 transaction.
pub fn priority_fee_of(tx: &TypedTransaction) -> U256 {
    match tx {
        TypedTransaction::Eip1559(inner) => {
            inner.max_priority_fee_per_gas.expect("priority fee set")
        }
        other => panic!("expected EIP-1559 transaction, got {:?}", other),
    }
}
