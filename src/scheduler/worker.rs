//! Per-core worker loop and the slice state machine.
//!
//! ```text
//!              wait_assignment
//!                    │
//!                    ▼
//!            ┌──────────────┐  Err   ┌──────────┐
//!            │ allocate_for │───────►│ Deferred │─► backoff, release, requeue tail
//!            └──────┬───────┘        └──────────┘
//!                   │ Ok
//!                   ▼
//!         ┌───────────────────┐ finished ┌──────────┐
//!    ┌───►│ completion check  │─────────►│ Finished │─► free memory, release
//!    │    └─────────┬─────────┘          └──────────┘
//!    │              │
//!    │    ┌─────────▼─────────┐ exhausted ┌───────────┐
//!    │    │  quantum check    │──────────►│ Preempted │─► release, requeue tail
//!    │    └─────────┬─────────┘           └───────────┘
//!    │              │
//!    │    ┌─────────▼─────────┐ stopped  ┌─────────────┐
//!    │    │   gate.pass()     │─────────►│ Interrupted │─► release, requeue head
//!    │    └─────────┬─────────┘          └─────────────┘
//!    │              │
//!    │     execute_next, delay
//!    └──────────────┘
//! ```
//!
//! Completion is checked before quantum exhaustion: a process whose last
//! instruction lands exactly on the quantum boundary finishes instead of
//! being requeued.
//!
//! Every transition that frees the core runs under `gate.hold_open`, so a
//! completed `pause()` freezes the busy-core count.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::metrics::WorkerMetricsLocal;
use super::runtime::Shared;
use super::trace::SchedTraceEvent;
use crate::process::{lock_process, CoreId, Pid, ProcessState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SliceOutcome {
    Finished,
    Preempted,
    Deferred,
    Interrupted,
    /// The pid was not in the process table.
    Orphaned,
}

/// Runs on worker thread `core` until `stop()`. Returns the worker's metrics.
pub(crate) fn worker_loop(shared: Arc<Shared>, core: CoreId) -> WorkerMetricsLocal {
    let mut metrics = WorkerMetricsLocal::new();
    while let Some((pid, quantum)) = shared.cores.wait_assignment(core) {
        let outcome = run_slice(&shared, core, pid, quantum, &mut metrics);
        log::trace!("core {core}: pid {pid} slice ended {outcome:?}");
    }
    log::debug!("core {core}: exiting");
    metrics
}

pub(crate) fn run_slice(
    shared: &Shared,
    core: CoreId,
    pid: Pid,
    quantum: Option<u32>,
    metrics: &mut WorkerMetricsLocal,
) -> SliceOutcome {
    let Some(handle) = shared.table.get(pid) else {
        log::warn!("core {core}: pid {pid} is not in the process table; dropping");
        shared.gate.hold_open(|_| shared.cores.release(core));
        return SliceOutcome::Orphaned;
    };

    // Reserve memory on first dispatch; kept across slices until finish.
    let reserved = {
        let mut p = lock_process(&handle);
        match shared.memory.allocate_for(&mut p) {
            Ok(()) => {
                p.set_state(ProcessState::Running);
                p.set_core(Some(core));
                Ok(())
            }
            Err(e) => {
                p.set_state(ProcessState::Ready);
                p.set_core(None);
                Err(e)
            }
        }
    };
    if let Err(e) = reserved {
        metrics.alloc_failures += 1;
        log::warn!("core {core}: {e}; retrying later");
        shared.gate.stall(shared.config.alloc_backoff);
        shared.gate.hold_open(|status| {
            if shared.trace.is_enabled() {
                shared.trace.on_event(SchedTraceEvent::Deferred { pid, core });
            }
            shared.cores.release(core);
            if status.is_stopped() {
                shared.queue.push_front(pid);
            } else {
                shared.queue.push(pid);
            }
        });
        return SliceOutcome::Deferred;
    }

    metrics.slices += 1;
    let mut executed: u32 = 0;
    let outcome = loop {
        if lock_process(&handle).is_finished() {
            break SliceOutcome::Finished;
        }
        if quantum.is_some_and(|q| executed >= q) {
            break SliceOutcome::Preempted;
        }
        let (status, waited) = shared.gate.pass();
        if waited {
            metrics.pause_waits += 1;
        }
        if status.is_stopped() {
            break SliceOutcome::Interrupted;
        }

        lock_process(&handle).execute_next(core);
        executed += 1;
        metrics.instructions_executed += 1;
        shared.cycles.fetch_add(1, Ordering::Relaxed);
        shared.per_core[core].fetch_add(1, Ordering::Relaxed);
        if let Some(q) = quantum {
            shared.cores.set_remaining(core, Some(q - executed));
        }

        shared.gate.stall(shared.config.instruction_delay);
    };
    metrics.slice_len.record(executed as u64);

    match outcome {
        SliceOutcome::Finished => {
            metrics.completions += 1;
            shared.gate.hold_open(|_| {
                {
                    let mut p = lock_process(&handle);
                    shared.memory.deallocate_for(&mut p);
                    p.set_state(ProcessState::Finished);
                    p.set_core(None);
                }
                if shared.trace.is_enabled() {
                    shared.trace.on_event(SchedTraceEvent::Finished { pid, core, executed });
                }
                shared.cores.release(core);
            });
            log::debug!("core {core}: pid {pid} finished");
        }
        SliceOutcome::Preempted => {
            metrics.preemptions += 1;
            shared.gate.hold_open(|_| {
                {
                    let mut p = lock_process(&handle);
                    p.set_state(ProcessState::Ready);
                    p.set_core(None);
                }
                // Release before requeue: the pid is never both queued and on a core.
                shared.cores.release(core);
                shared.queue.push(pid);
                // Reported once the pid is back in the queue; the gate keeps
                // it there until this closure returns.
                if shared.trace.is_enabled() {
                    shared.trace.on_event(SchedTraceEvent::Preempted { pid, core, executed });
                }
            });
        }
        SliceOutcome::Interrupted => {
            metrics.interrupted += 1;
            {
                let mut p = lock_process(&handle);
                p.set_state(ProcessState::Ready);
                p.set_core(None);
            }
            if shared.trace.is_enabled() {
                shared.trace.on_event(SchedTraceEvent::Interrupted { pid, core, executed });
            }
            shared.cores.release(core);
            shared.queue.push_front(pid);
        }
        SliceOutcome::Deferred | SliceOutcome::Orphaned => {}
    }
    outcome
}
