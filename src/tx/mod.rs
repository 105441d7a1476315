//! Transaction dispatch pipeline: unit coalescing, rate-limited batch
//! dispatch, and fee-escalating retry for single actions

pub mod admission;
pub mod coalescer;
pub mod gas;
pub mod nonce;
pub mod queue;
pub mod rbf;

pub use admission::AdmissionQueue;
pub use coalescer::{Coalescer, SubmitBatchFn};
pub use gas::GasEstimator;
pub use nonce::NonceCache;
pub use queue::{BatchOutcome, BatchQueue};
pub use rbf::{OnHash, RbfOutcome, RbfRequest, RbfSender};
