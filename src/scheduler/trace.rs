//! Scheduling trace hooks.
//!
//! The scheduler reports every state transition to a [`TraceSink`]. The
//! production default is [`NoopTrace`]; tests install a [`RecordingTrace`]
//! to assert on exact slice boundaries without racing against live
//! introspection queries.

use std::sync::{Mutex, MutexGuard};

use crate::process::{CoreId, Pid};

/// One scheduling transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedTraceEvent {
    /// Accepted by `add_process`.
    Submitted { pid: Pid },
    /// Handed to a core. `quantum` is the slice budget (`None` under FCFS).
    Dispatched {
        pid: Pid,
        core: CoreId,
        quantum: Option<u32>,
    },
    /// Quantum exhausted; requeued at the tail. Emitted after the push and
    /// before the dispatcher can take the pid again.
    Preempted { pid: Pid, core: CoreId, executed: u32 },
    /// Last instruction executed; memory released.
    Finished { pid: Pid, core: CoreId, executed: u32 },
    /// Memory could not be reserved; requeued after backoff.
    Deferred { pid: Pid, core: CoreId },
    /// Slice cut short by `stop()`; handed back to the queue head.
    Interrupted { pid: Pid, core: CoreId, executed: u32 },
}

impl SchedTraceEvent {
    pub fn pid(&self) -> Pid {
        match *self {
            Self::Submitted { pid }
            | Self::Dispatched { pid, .. }
            | Self::Preempted { pid, .. }
            | Self::Finished { pid, .. }
            | Self::Deferred { pid, .. }
            | Self::Interrupted { pid, .. } => pid,
        }
    }
}

/// Receiver for scheduling events. Called from the dispatch and worker
/// threads, so implementations must be thread-safe.
pub trait TraceSink: Send + Sync {
    #[inline(always)]
    fn is_enabled(&self) -> bool {
        false
    }

    #[inline(always)]
    fn on_event(&self, _event: SchedTraceEvent) {}
}

/// No-op tracing (production default).
#[derive(Debug, Default)]
pub struct NoopTrace;

impl TraceSink for NoopTrace {}

/// Records every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingTrace {
    events: Mutex<Vec<SchedTraceEvent>>,
}

impl RecordingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SchedTraceEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<SchedTraceEvent> {
        self.lock().clone()
    }

    /// Events concerning `pid`, in order.
    pub fn events_for(&self, pid: Pid) -> Vec<SchedTraceEvent> {
        self.lock().iter().filter(|e| e.pid() == pid).copied().collect()
    }

    /// Instructions executed by each slice of `pid` that ended in a
    /// preemption, completion or interruption.
    pub fn slices_of(&self, pid: Pid) -> Vec<u32> {
        self.lock()
            .iter()
            .filter_map(|e| match *e {
                SchedTraceEvent::Preempted { pid: p, executed, .. }
                | SchedTraceEvent::Finished { pid: p, executed, .. }
                | SchedTraceEvent::Interrupted { pid: p, executed, .. }
                    if p == pid =>
                {
                    Some(executed)
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl TraceSink for RecordingTrace {
    #[inline(always)]
    fn is_enabled(&self) -> bool {
        true
    }

    fn on_event(&self, event: SchedTraceEvent) {
        self.lock().push(event);
    }
}
