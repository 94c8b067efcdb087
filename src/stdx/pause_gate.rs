//! Broadcast pause gate with a stop latch.
//!
//! Every scheduler loop passes through the gate at its progress boundaries
//! (before dispatching, before each instruction, before releasing a core).
//! While paused, callers block on the gate's condvar; `resume()` and `stop()`
//! both broadcast, so nobody sleeps through a shutdown.
//!
//! The gate also provides [`PauseGate::stall`], an interruptible timed sleep
//! used for the per-instruction delay and allocation backoff: it returns
//! early only when the gate is stopped.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    stopped: bool,
}

/// Result of passing through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateStatus {
    /// Caller may make progress.
    Open,
    /// Stop was requested; caller must wind down.
    Stopped,
}

impl GateStatus {
    #[inline]
    pub fn is_stopped(self) -> bool {
        self == GateStatus::Stopped
    }
}

/// Pause/resume gate shared by the dispatch thread and every worker.
#[derive(Debug, Default)]
pub struct PauseGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Close the gate. Returns `false` if already paused or stopped.
    pub fn pause(&self) -> bool {
        let mut st = self.lock();
        if st.paused || st.stopped {
            return false;
        }
        st.paused = true;
        true
    }

    /// Reopen the gate and wake all waiters. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let mut st = self.lock();
        if !st.paused {
            return false;
        }
        st.paused = false;
        drop(st);
        self.cv.notify_all();
        true
    }

    /// Latch the stop flag, clear any pause and wake all waiters.
    pub fn stop(&self) {
        let mut st = self.lock();
        st.stopped = true;
        st.paused = false;
        drop(st);
        self.cv.notify_all();
    }

    /// Clear both flags so the gate can serve a new run.
    pub fn rearm(&self) {
        let mut st = self.lock();
        st.stopped = false;
        st.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Block while paused.
    ///
    /// Returns `(status, waited)`; `waited` is true when the caller actually
    /// blocked on a pause.
    pub fn pass(&self) -> (GateStatus, bool) {
        let mut st = self.lock();
        let mut waited = false;
        while st.paused && !st.stopped {
            waited = true;
            st = match self.cv.wait(st) {
                Ok(guard) => guard,
                Err(poison) => poison.into_inner(),
            };
        }
        let status = if st.stopped {
            GateStatus::Stopped
        } else {
            GateStatus::Open
        };
        (status, waited)
    }

    /// Block while paused; see [`pass`](Self::pass).
    #[inline]
    pub fn wait_open(&self) -> GateStatus {
        self.pass().0
    }

    /// Block while paused, then run `f` with the gate lock held.
    ///
    /// `pause()` cannot complete while `f` runs, so a state change made in
    /// `f` is either fully visible before a pause or deferred until resume.
    /// `f` receives the gate status and must not touch the gate itself.
    pub fn hold_open<R>(&self, f: impl FnOnce(GateStatus) -> R) -> R {
        let mut st = self.lock();
        while st.paused && !st.stopped {
            st = match self.cv.wait(st) {
                Ok(guard) => guard,
                Err(poison) => poison.into_inner(),
            };
        }
        let status = if st.stopped {
            GateStatus::Stopped
        } else {
            GateStatus::Open
        };
        let out = f(status);
        drop(st);
        out
    }

    /// Sleep for `dur`, returning early only if the gate is stopped.
    ///
    /// Pausing does not shorten or extend a stall; pause is honored at the
    /// next call to [`wait_open`](Self::wait_open).
    pub fn stall(&self, dur: Duration) -> GateStatus {
        if dur.is_zero() {
            return if self.is_stopped() {
                GateStatus::Stopped
            } else {
                GateStatus::Open
            };
        }
        let deadline = Instant::now() + dur;
        let mut st = self.lock();
        loop {
            if st.stopped {
                return GateStatus::Stopped;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return GateStatus::Open;
            }
            st = match self.cv.wait_timeout(st, remaining) {
                Ok((guard, _)) => guard,
                Err(poison) => poison.into_inner().0,
            };
        }
    }
}
