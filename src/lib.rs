//! Burst relayer - rate-limited dispatch of on-chain actions
//!
//! Coalesces rapid user-triggered units of work into capped batches, pushes
//! them through a rate-limited dispatch queue with per-account nonce
//! sequencing, and serves latency-sensitive single actions through a
//! single-flight replace-by-fee retry loop. Every enqueued unit ends in a
//! receipt, a timeout-with-hash, or an explicit terminal error.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod tx;
