//! Timer entries
//!
//! A timer is rescheduled only after its tick returns, so ticks of one timer
//! never overlap. It stops once its count is exhausted and leaves the table
//! when its last reference is dropped.

use afb_glue_sdk::{TimerId, TimerListener, TimerSpec};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct TimerState {
    refs: usize,
    /// Ticks left, `None` when unbounded
    left: Option<u32>,
    /// Delay key of the next tick
    pending: Option<u64>,
}

pub(crate) struct TimerEntry {
    pub(crate) id: TimerId,
    pub(crate) uid: String,
    pub(crate) period: Duration,
    pub(crate) listener: Arc<dyn TimerListener>,
    state: Mutex<TimerState>,
}

impl TimerEntry {
    pub(crate) fn new(id: TimerId, spec: &TimerSpec, listener: Arc<dyn TimerListener>) -> Self {
        Self {
            id,
            uid: spec.uid.clone(),
            period: Duration::from_millis(spec.period_ms),
            listener,
            state: Mutex::new(TimerState {
                refs: 1,
                left: (spec.count > 0).then_some(spec.count),
                pending: None,
            }),
        }
    }

    /// Value passed to the listener: ticks left including this one, 0 when
    /// unbounded
    pub(crate) fn remaining(&self) -> u32 {
        self.state.lock().left.unwrap_or(0)
    }

    /// Count one tick; false once the count is exhausted
    pub(crate) fn consume(&self) -> bool {
        let mut state = self.state.lock();
        match state.left.as_mut() {
            None => true,
            Some(left) => {
                *left = left.saturating_sub(1);
                *left > 0
            }
        }
    }

    pub(crate) fn set_pending(&self, key: Option<u64>) {
        self.state.lock().pending = key;
    }

    pub(crate) fn addref(&self) -> usize {
        let mut state = self.state.lock();
        state.refs += 1;
        state.refs
    }

    /// Drop a reference; returns the pending delay key once the last one is
    /// gone
    pub(crate) fn unref(&self) -> Option<Option<u64>> {
        let mut state = self.state.lock();
        state.refs = state.refs.saturating_sub(1);
        (state.refs == 0).then(|| state.pending.take())
    }
}
