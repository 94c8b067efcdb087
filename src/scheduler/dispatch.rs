//! Dispatch loop: ready queue → idle core.

use std::sync::Arc;

use super::runtime::Shared;
use super::trace::SchedTraceEvent;

/// Runs on the dispatch thread until `stop()`.
///
/// ```text
/// loop:
///   gate.wait_open()             paused? block. stopped? exit.
///   cores.wait_idle()            no idle core? block.
///   queue.wait_nonempty()        empty? block. closed? exit.
///   gate.hold_open(assign_next)  paused? block. stopped? exit.
/// ```
///
/// Nothing leaves the ready queue until the gated `assign_next`, which pops
/// and assigns in one step. A `pause()` that lands between the waits and the
/// assignment therefore leaves the pid visible in the queue.
pub(crate) fn dispatch_loop(shared: Arc<Shared>) {
    let budget = shared.config.policy.slice_budget();
    loop {
        if shared.gate.wait_open().is_stopped() {
            break;
        }
        if !shared.cores.wait_idle() {
            break;
        }
        if !shared.queue.wait_nonempty() {
            break;
        }

        let stopped = shared.gate.hold_open(|status| {
            if status.is_stopped() {
                return true;
            }
            if let Some((pid, core)) = shared.cores.assign_next(&shared.queue, budget) {
                if shared.trace.is_enabled() {
                    shared.trace.on_event(SchedTraceEvent::Dispatched {
                        pid,
                        core,
                        quantum: budget,
                    });
                }
                log::debug!("dispatch: pid {pid} -> core {core}");
            }
            false
        });
        if stopped {
            break;
        }
    }
    log::debug!("dispatch: exiting");
}
