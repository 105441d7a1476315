//! Single-flight admission for latency-sensitive sends
//!
//! Independently triggered single-action sends share one account, so at most
//! one fee-escalating retry loop may be in flight at a time; later callers
//! queue in FIFO order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct AdmissionQueue {
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

impl AdmissionQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Run `fut` once a slot frees up. Admission order is FIFO.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        crate::metrics::set_admission_queue_depth(self.waiting.load(Ordering::SeqCst));

        // Never closed, so acquire can only succeed.
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("admission semaphore closed");

        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        crate::metrics::set_admission_queue_depth(self.waiting.load(Ordering::SeqCst));
        crate::metrics::set_admission_in_flight(self.in_flight.load(Ordering::SeqCst));

        let result = fut.await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        crate::metrics::set_admission_in_flight(self.in_flight.load(Ordering::SeqCst));

        result
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
