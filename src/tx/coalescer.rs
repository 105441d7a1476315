//! Coalesces rapid unit-of-work requests into capped batch submissions
//!
//! Units recorded within one window are merged into a single batch; when the
//! cap is hit, the backlog drains through zero-delay follow-up flushes.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Callback invoked with the unit count of each flushed batch.
pub type SubmitBatchFn = Arc<dyn Fn(u32) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Coalescer {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    window: Duration,
    max_units: u32,
    submit: SubmitBatchFn,
}

struct State {
    pending: u32,
    timer_armed: bool,
}

impl Coalescer {
    /// `max_units` must match the dispatch queue's batch-size ceiling.
    pub fn new(window_ms: u64, max_units: u32, submit: SubmitBatchFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: 0,
                    timer_armed: false,
                }),
                window: Duration::from_millis(window_ms),
                max_units,
                submit,
            }),
        }
    }

    /// Count one unit and arm the flush timer if none is live.
    pub fn record_unit(&self) {
        let mut state = self.inner.state.lock().expect("coalescer state poisoned");
        state.pending += 1;
        crate::metrics::set_coalescer_pending(state.pending);
        crate::metrics::record_unit_recorded();

        if !state.timer_armed {
            state.timer_armed = true;
            let inner = self.inner.clone();
            tokio::spawn(async move {
                sleep(inner.window).await;
                Inner::flush(inner).await;
            });
        }
    }

    /// Units recorded but not yet flushed.
    pub fn pending_count(&self) -> u32 {
        self.inner
            .state
            .lock()
            .expect("coalescer state poisoned")
            .pending
    }
}

impl Inner {
    async fn flush(inner: Arc<Self>) {
        loop {
            // The decrement, the continue decision, and the amount handed to
            // the callback all come from one critical section, so no unit is
            // lost or double-counted and at most one timer is live while
            // pending > 0.
            let (take, more) = {
                let mut state = inner.state.lock().expect("coalescer state poisoned");

                let take = state.pending.min(inner.max_units);
                state.pending -= take;
                crate::metrics::set_coalescer_pending(state.pending);

                // While backlog remains past the cap, this task stays armed
                // and drains it without waiting another window.
                let more = state.pending > 0;
                state.timer_armed = more;

                (take, more)
            };

            if take > 0 {
                debug!(units = take, "flushing coalesced batch");
                (inner.submit)(take).await;
            }

            if !more {
                break;
            }
        }
    }
}
