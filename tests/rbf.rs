//! Replace-by-fee retry loop behavior against a scripted chain RPC

mod common;

use common::{max_fee_of, priority_fee_of, test_wallet, MockRpc, ReceiptMode};

use burst_relayer::config::DispatcherConfig;
use burst_relayer::error::DispatchError;
use burst_relayer::tx::{AdmissionQueue, OnHash, RbfRequest, RbfSender};

use ethers::types::{Address, H256, U256};
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn sender(rpc: Arc<MockRpc>) -> RbfSender {
    RbfSender::new(rpc, test_wallet(), &DispatcherConfig::default())
}

fn request(deadline_ms: u64) -> RbfRequest {
    RbfRequest {
        to: Address::repeat_byte(0x99),
        value: U256::from(12_345u64),
        data: None,
        deadline: Duration::from_millis(deadline_ms),
    }
}

#[tokio::test(start_paused = true)]
async fn confirms_on_the_first_round_when_the_receipt_is_fast() {
    let rpc = Arc::new(MockRpc::new());
    let rbf = sender(rpc.clone());

    let outcome = rbf.send(request(5_000), None).await.expect("confirms");

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.tx_hash, rpc.accepted_hashes()[0]);
    assert!(outcome.latency <= Duration::from_millis(5_000));

    let txs = rpc.decoded_submissions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].nonce().map(|n| n.as_u64()), Some(7));
    assert_eq!(txs[0].value().map(|v| v.as_u64()), Some(12_345));
}

#[tokio::test(start_paused = true)]
async fn escalates_fees_at_a_fixed_nonce_until_the_receipt_appears() {
    // The first hash confirms only on its 30th lookup, which lands in the
    // second escalation round.
    let rpc = Arc::new(MockRpc::new().with_receipt_mode(ReceiptMode::AfterPolls(30)));
    let rbf = sender(rpc.clone());

    let outcome = rbf.send(request(10_000), None).await.expect("confirms");

    assert_eq!(outcome.attempts, 2);
    // The tracked hash stays the first accepted one; the replacement is
    // assumed to supersede, not duplicate.
    assert_eq!(outcome.tx_hash, rpc.accepted_hashes()[0]);

    let txs = rpc.decoded_submissions();
    assert_eq!(txs.len(), 2);

    // Nonce is constant across the whole sequence, fetched exactly once.
    assert_eq!(rpc.nonce_fetches.load(SeqCst), 1);
    assert_eq!(txs[0].nonce().map(|n| n.as_u64()), Some(7));
    assert_eq!(txs[1].nonce().map(|n| n.as_u64()), Some(7));

    // Both fee fields are strictly increasing: +20% plus 1 wei.
    assert_eq!(max_fee_of(&txs[0]), U256::from(2_000u64));
    assert_eq!(max_fee_of(&txs[1]), U256::from(2_401u64));
    assert_eq!(priority_fee_of(&txs[0]), U256::from(100u64));
    assert_eq!(priority_fee_of(&txs[1]), U256::from(121u64));
}

#[tokio::test(start_paused = true)]
async fn swallowed_submission_failures_do_not_abort_the_loop() {
    let rpc = Arc::new(
        MockRpc::new().with_submit_script(vec![Err("nonce too low".to_string())]),
    );
    let rbf = sender(rpc.clone());

    let outcome = rbf.send(request(10_000), None).await.expect("confirms");

    // The first attempt was rejected; the second round's resubmission is the
    // one tracked and confirmed.
    assert_eq!(outcome.attempts, 2);
    assert_eq!(rpc.accepted_hashes().len(), 1);
    assert_eq!(outcome.tx_hash, rpc.accepted_hashes()[0]);

    // Fees still escalated between the two attempts.
    let txs = rpc.decoded_submissions();
    assert!(max_fee_of(&txs[1]) > max_fee_of(&txs[0]));
}

#[tokio::test(start_paused = true)]
async fn abandons_with_deadline_exceeded_when_no_receipt_ever_appears() {
    let rpc = Arc::new(MockRpc::new().with_receipt_mode(ReceiptMode::Never));
    let rbf = sender(rpc.clone());

    let err = rbf
        .send(request(3_000), None)
        .await
        .expect_err("deadline is terminal");

    match err {
        DispatchError::DeadlineExceeded {
            attempts,
            last_hash,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_hash, Some(rpc.accepted_hashes()[0]));
        }
        other => panic!("expected DeadlineExceeded, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn zero_deadline_uses_the_configured_default() {
    let rpc = Arc::new(MockRpc::new().with_receipt_mode(ReceiptMode::Never));
    let rbf = sender(rpc.clone());

    let start = Instant::now();
    let err = rbf.send(request(0), None).await.expect_err("abandoned");

    assert!(matches!(err, DispatchError::DeadlineExceeded { .. }));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(8_000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(9_000));
}

#[tokio::test(start_paused = true)]
async fn hash_callback_fires_once_with_the_first_accepted_hash() {
    let rpc = Arc::new(MockRpc::new().with_receipt_mode(ReceiptMode::AfterPolls(30)));
    let rbf = sender(rpc.clone());

    let seen: Arc<Mutex<Vec<H256>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_hash: OnHash = Box::new(move |hash| {
        sink.lock().unwrap().push(hash);
    });

    rbf.send(request(10_000), Some(on_hash)).await.expect("confirms");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], rpc.accepted_hashes()[0]);
}

#[tokio::test(start_paused = true)]
async fn admitted_sends_share_the_account_one_at_a_time() {
    let rpc = Arc::new(MockRpc::new());
    let rbf = Arc::new(sender(rpc.clone()));
    let admission = Arc::new(AdmissionQueue::new(1));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let rbf = rbf.clone();
        let admission = admission.clone();
        handles.push(tokio::spawn(async move {
            admission.run(rbf.send(request(5_000), None)).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().expect("both admitted sends confirm");
    }

    // Serialized sends never interleave their submissions: each send's
    // single submission completes before the next send fetches its nonce.
    assert_eq!(rpc.decoded_submissions().len(), 2);
    assert_eq!(rpc.nonce_fetches.load(SeqCst), 2);
    assert_eq!(admission.in_flight(), 0);
    assert_eq!(admission.queue_depth(), 0);
}
