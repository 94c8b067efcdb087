//! Core table: one execution slot per emulated core.
//!
//! # Protocol
//!
//! ```text
//!   dispatch thread                      worker N
//!   ───────────────                      ────────
//!   wait_idle()      ◄── idle_cv ───     release(N)
//!   assign_next()    ─── assign_cv[N] ─► wait_assignment(N)
//! ```
//!
//! A slot is busy from `assign_next` until the worker calls `release`.
//! The slot keeps its pid for the whole slice, so `running()` reflects live
//! assignments even while the worker is blocked on the pause gate.
//!
//! # Invariants
//!
//! - `busy == current.is_some()` for every slot.
//! - A pid occupies at most one slot.
//! - Only the dispatch thread assigns; only the owning worker (or `stop()`
//!   after joining) releases.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use serde::Serialize;

use crate::process::{CoreId, Pid};
use crate::stdx::BlockingQueue;

#[derive(Clone, Copy, Debug, Default)]
struct CoreSlot {
    current: Option<Pid>,
    remaining_quantum: Option<u32>,
}

impl CoreSlot {
    #[inline]
    fn busy(&self) -> bool {
        self.current.is_some()
    }
}

#[derive(Debug)]
struct CoreState {
    slots: Vec<CoreSlot>,
    shutdown: bool,
}

/// Point-in-time view of one core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CoreView {
    pub core: CoreId,
    pub busy: bool,
    pub current: Option<Pid>,
    pub remaining_quantum: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct CoreTable {
    state: Mutex<CoreState>,
    idle_cv: Condvar,
    assign_cv: Vec<Condvar>,
}

impl CoreTable {
    pub(crate) fn new(cores: usize) -> Self {
        Self {
            state: Mutex::new(CoreState {
                slots: vec![CoreSlot::default(); cores],
                shutdown: false,
            }),
            idle_cv: Condvar::new(),
            assign_cv: (0..cores).map(|_| Condvar::new()).collect(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    #[inline]
    fn wait<'a>(cv: &Condvar, guard: MutexGuard<'a, CoreState>) -> MutexGuard<'a, CoreState> {
        match cv.wait(guard) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.assign_cv.len()
    }

    /// Block until some core is idle. Returns `false` on shutdown.
    pub(crate) fn wait_idle(&self) -> bool {
        let mut st = self.lock();
        loop {
            if st.shutdown {
                return false;
            }
            if st.slots.iter().any(|s| !s.busy()) {
                return true;
            }
            st = Self::wait(&self.idle_cv, st);
        }
    }

    /// Move the head of `queue` onto the lowest-numbered idle core.
    ///
    /// The pop and the assignment happen under the table lock, and snapshots
    /// lock the table before the queue, so no observer sees the pid in
    /// neither place. Returns `None` if every core is busy or the queue is
    /// empty.
    pub(crate) fn assign_next(&self, queue: &BlockingQueue<Pid>, quantum: Option<u32>) -> Option<(Pid, CoreId)> {
        let mut st = self.lock();
        let core = st.slots.iter().position(|s| !s.busy())?;
        let pid = queue.try_pop()?;
        debug_assert!(
            st.slots.iter().all(|s| s.current != Some(pid)),
            "pid {pid} already on a core"
        );
        st.slots[core] = CoreSlot {
            current: Some(pid),
            remaining_quantum: quantum,
        };
        drop(st);
        self.assign_cv[core].notify_one();
        Some((pid, core))
    }

    /// Block until `core` has an assignment. Returns `None` on shutdown.
    pub(crate) fn wait_assignment(&self, core: CoreId) -> Option<(Pid, Option<u32>)> {
        let mut st = self.lock();
        loop {
            if st.shutdown {
                return None;
            }
            let slot = st.slots[core];
            if let Some(pid) = slot.current {
                return Some((pid, slot.remaining_quantum));
            }
            st = Self::wait(&self.assign_cv[core], st);
        }
    }

    pub(crate) fn set_remaining(&self, core: CoreId, remaining: Option<u32>) {
        self.lock().slots[core].remaining_quantum = remaining;
    }

    /// Mark `core` idle and wake the dispatcher.
    pub(crate) fn release(&self, core: CoreId) {
        let mut st = self.lock();
        st.slots[core] = CoreSlot::default();
        drop(st);
        self.idle_cv.notify_all();
    }

    /// Wake every waiter; subsequent waits return immediately.
    pub(crate) fn shutdown(&self) {
        self.lock().shutdown = true;
        self.idle_cv.notify_all();
        for cv in &self.assign_cv {
            cv.notify_all();
        }
    }

    pub(crate) fn rearm(&self) {
        self.lock().shutdown = false;
    }

    /// Clear every occupied slot and return the pids that were on them,
    /// lowest core first. Only called once all workers have exited.
    pub(crate) fn drain_assigned(&self) -> Vec<Pid> {
        let mut st = self.lock();
        let drained = st.slots.iter().filter_map(|s| s.current).collect();
        for slot in &mut st.slots {
            *slot = CoreSlot::default();
        }
        drained
    }

    pub(crate) fn busy_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.busy()).count()
    }

    pub(crate) fn running(&self) -> BTreeMap<Pid, CoreId> {
        Self::running_in(&self.lock())
    }

    fn running_in(st: &CoreState) -> BTreeMap<Pid, CoreId> {
        st.slots
            .iter()
            .enumerate()
            .filter_map(|(core, s)| s.current.map(|pid| (pid, core)))
            .collect()
    }

    pub(crate) fn views(&self) -> Vec<CoreView> {
        self.lock()
            .slots
            .iter()
            .enumerate()
            .map(|(core, s)| CoreView {
                core,
                busy: s.busy(),
                current: s.current,
                remaining_quantum: s.remaining_quantum,
            })
            .collect()
    }

    /// Run `f` with the running map while the table is locked.
    ///
    /// No slot can change while `f` runs. `f` may lock the ready queue
    /// (never the reverse), which gives a consistent queue/core observation.
    pub(crate) fn with_running<R>(&self, f: impl FnOnce(BTreeMap<Pid, CoreId>) -> R) -> R {
        let st = self.lock();
        f(Self::running_in(&st))
    }
}
