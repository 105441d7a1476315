//! Local nonce cache for reliable transaction submission
//!
//! Handles:
//! - Fetch-once tracking of the next usable account nonce
//! - Local increments between fetches (no sender shares the account)
//! - Invalidation after sequencing conflicts, forcing a re-fetch

/// Next-nonce cache owned exclusively by the dispatch actor.
///
/// Once primed from the chain it is the only source of truth until
/// `invalidate` is called; allocations increment it locally.
#[derive(Debug, Default)]
pub struct NonceCache {
    next: Option<u64>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self { next: None }
    }

    /// The nonce the next allocation would return, if primed.
    pub fn cached(&self) -> Option<u64> {
        self.next
    }

    /// Seed the cache from an on-chain pending-nonce fetch.
    pub fn prime(&mut self, on_chain: u64) {
        self.next = Some(on_chain);
    }

    /// Advance past the nonce just handed out.
    pub fn advance(&mut self) {
        if let Some(n) = self.next {
            self.next = Some(n + 1);
        }
    }

    /// Return a failed allocation so the retry reuses the same nonce.
    pub fn release(&mut self, nonce: u64) {
        if self.next == Some(nonce + 1) {
            self.next = Some(nonce);
        }
    }

    /// Drop the cache entirely; the next dispatch must re-fetch.
    pub fn invalidate(&mut self) {
        self.next = None;
    }
}
