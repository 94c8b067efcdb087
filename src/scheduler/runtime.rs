//! The scheduler: ready queue, core table, dispatch thread and workers.
//!
//! # Lifecycle
//!
//! ```text
//!   Stopped ──start()──► Running ──pause()──► Paused
//!      ▲                   │  ▲                 │
//!      └──────stop()───────┘  └───resume()──────┘
//!      ▲                                        │
//!      └─────────────────stop()─────────────────┘
//! ```
//!
//! `start()` spawns one dispatch thread and one worker thread per core.
//! `stop()` latches the pause gate, closes the ready queue and shuts down the
//! core table (waking every blocked wait), joins all threads, and hands any
//! process still on a core back to the head of the queue. A stopped
//! scheduler can be started again and continues where it left off.
//!
//! # Locking
//!
//! Lock order, outermost first:
//! `submitted` → pause gate → process → allocator → core table → ready queue.
//! No lock is held across a blocking wait other than the condvar's own.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;

use super::cores::{CoreTable, CoreView};
use super::dispatch::dispatch_loop;
use super::metrics::{MetricsSnapshot, WorkerMetricsLocal};
use super::policy::SchedulerConfig;
use super::trace::{NoopTrace, SchedTraceEvent, TraceSink};
use super::worker::worker_loop;
use crate::memory::MemoryManager;
use crate::process::{lock_process, CoreId, Pid, ProcessState, ProcessTable};
use crate::stdx::{BlockingQueue, PauseGate};

/// State shared between the scheduler handle, the dispatch thread and the
/// workers.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) table: Arc<ProcessTable>,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) queue: BlockingQueue<Pid>,
    pub(crate) gate: PauseGate,
    pub(crate) cores: CoreTable,
    /// Instructions executed across all cores, all runs.
    pub(crate) cycles: AtomicU64,
    /// Instructions executed per core.
    pub(crate) per_core: Vec<CachePadded<AtomicU64>>,
    pub(crate) trace: Arc<dyn TraceSink>,
}

#[derive(Default)]
struct Submitted {
    order: Vec<Pid>,
    seen: HashSet<Pid>,
}

struct RunThreads {
    dispatch: JoinHandle<()>,
    workers: Vec<JoinHandle<WorkerMetricsLocal>>,
}

/// Consistent observation of the ready queue and the cores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub total_cores: usize,
    pub running: BTreeMap<Pid, CoreId>,
    pub queued: Vec<Pid>,
}

impl SchedulerSnapshot {
    #[inline]
    pub fn busy_cores(&self) -> usize {
        self.running.len()
    }
}

/// Multi-core process scheduler, FCFS or round-robin per
/// [`SchedulerConfig::policy`].
///
/// All methods take `&self`; the scheduler can be shared behind an `Arc`
/// with a batch spawner or a monitoring thread.
pub struct Scheduler {
    shared: Arc<Shared>,
    submitted: Mutex<Submitted>,
    threads: Mutex<Option<RunThreads>>,
    lifetime: Mutex<MetricsSnapshot>,
}

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

impl Scheduler {
    /// Create a stopped scheduler.
    ///
    /// # Panics
    ///
    /// Panics if `config.cores` is 0.
    pub fn new(config: SchedulerConfig, table: Arc<ProcessTable>, memory: Arc<MemoryManager>) -> Self {
        Self::with_trace(config, table, memory, Arc::new(NoopTrace))
    }

    /// Like [`new`](Self::new) with a trace sink receiving every transition.
    pub fn with_trace(
        config: SchedulerConfig,
        table: Arc<ProcessTable>,
        memory: Arc<MemoryManager>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        assert!(config.cores > 0, "scheduler needs at least one core");
        let cores = config.cores;
        let shared = Arc::new(Shared {
            config,
            table,
            memory,
            queue: BlockingQueue::new(),
            gate: PauseGate::new(),
            cores: CoreTable::new(cores),
            cycles: AtomicU64::new(0),
            per_core: (0..cores).map(|_| CachePadded::new(AtomicU64::new(0))).collect(),
            trace,
        });
        Self {
            shared,
            submitted: Mutex::new(Submitted::default()),
            threads: Mutex::new(None),
            lifetime: Mutex::new(MetricsSnapshot::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Enqueue `pid` at the tail of the ready queue.
    ///
    /// Returns `false` (no-op) if `pid` is not in the process table or was
    /// already submitted: it is queued, on a core, or finished.
    pub fn add_process(&self, pid: Pid) -> bool {
        if !self.shared.table.contains(pid) {
            log::warn!("scheduler: add_process({pid}) for unknown pid");
            return false;
        }
        let mut submitted = lock(&self.submitted);
        if !submitted.seen.insert(pid) {
            return false;
        }
        submitted.order.push(pid);
        if self.shared.trace.is_enabled() {
            self.shared.trace.on_event(SchedTraceEvent::Submitted { pid });
        }
        self.shared.queue.push(pid);
        true
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the dispatch thread and one worker per core. No-op if running.
    ///
    /// Returns `true` if this call started the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    pub fn start(&self) -> bool {
        let mut threads = lock(&self.threads);
        if threads.is_some() {
            return false;
        }
        self.shared.queue.reopen();
        self.shared.gate.rearm();
        self.shared.cores.rearm();

        let workers = (0..self.shared.cores.len())
            .map(|core| {
                let shared = Arc::clone(&self.shared);
                thread::Builder::new()
                    .name(format!("sched-core-{core}"))
                    .spawn(move || worker_loop(shared, core))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        let dispatch = {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name("sched-dispatch".into())
                .spawn(move || dispatch_loop(shared))
                .expect("failed to spawn dispatch thread")
        };
        *threads = Some(RunThreads { dispatch, workers });
        log::info!(
            "scheduler: started {} ({} cores)",
            self.shared.config.policy,
            self.shared.cores.len()
        );
        true
    }

    /// Stop every thread and wait for them to exit.
    ///
    /// Safe while paused. Processes interrupted mid-slice return to the
    /// head of the ready queue with their cursor and memory intact. Returns
    /// the metrics of the run just ended (empty if not running).
    pub fn stop(&self) -> MetricsSnapshot {
        let mut threads = lock(&self.threads);
        let Some(run) = threads.take() else {
            return MetricsSnapshot::new();
        };

        self.shared.gate.stop();
        self.shared.queue.close();
        self.shared.cores.shutdown();

        if run.dispatch.join().is_err() {
            log::error!("scheduler: dispatch thread panicked");
        }
        let mut snapshot = MetricsSnapshot::new();
        for (core, worker) in run.workers.into_iter().enumerate() {
            match worker.join() {
                Ok(m) => snapshot.merge_worker(&m),
                Err(_) => log::error!("scheduler: worker on core {core} panicked"),
            }
        }

        // Assignments no worker picked up before shutdown.
        for pid in self.shared.cores.drain_assigned().into_iter().rev() {
            self.shared.table.with(pid, |p| {
                p.set_state(ProcessState::Ready);
                p.set_core(None);
            });
            self.shared.queue.push_front(pid);
        }

        lock(&self.lifetime).merge(&snapshot);
        log::info!(
            "scheduler: stopped after {} instructions, {} completions",
            snapshot.instructions_executed,
            snapshot.completions
        );
        snapshot
    }

    /// Block every loop at its next progress boundary. Returns `false` if
    /// not running or already paused.
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let paused = self.shared.gate.pause();
        if paused {
            log::info!("scheduler: paused");
        }
        paused
    }

    /// Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let resumed = self.shared.gate.resume();
        if resumed {
            log::info!("scheduler: resumed");
        }
        resumed
    }

    pub fn is_running(&self) -> bool {
        lock(&self.threads).is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.gate.is_paused()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    pub fn total_cores(&self) -> usize {
        self.shared.cores.len()
    }

    pub fn busy_cores(&self) -> usize {
        self.shared.cores.busy_count()
    }

    /// Pid → core for every occupied core.
    pub fn running_processes(&self) -> BTreeMap<Pid, CoreId> {
        self.shared.cores.running()
    }

    /// Ready queue contents, head first.
    pub fn queued_processes(&self) -> Vec<Pid> {
        self.shared.queue.snapshot()
    }

    /// Submitted processes, in submission order, that have executed their
    /// last instruction and left their core.
    pub fn finished_processes(&self) -> Vec<Pid> {
        let order = lock(&self.submitted).order.clone();
        let running = self.shared.cores.running();
        order
            .into_iter()
            .filter(|pid| !running.contains_key(pid))
            .filter(|&pid| {
                self.shared
                    .table
                    .with(pid, |p| p.is_finished() && p.state() == ProcessState::Finished)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Number of submitted processes (all-time).
    pub fn submitted_count(&self) -> usize {
        lock(&self.submitted).order.len()
    }

    /// Queue and cores observed under one lock.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let total_cores = self.total_cores();
        self.shared.cores.with_running(|running| SchedulerSnapshot {
            total_cores,
            running,
            queued: self.shared.queue.snapshot(),
        })
    }

    /// Per-core slot state, in core order.
    pub fn core_views(&self) -> Vec<CoreView> {
        self.shared.cores.views()
    }

    /// Instructions executed since construction.
    pub fn cpu_cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Relaxed)
    }

    /// Instructions executed by each core since construction.
    pub fn core_instructions(&self) -> Vec<u64> {
        self.shared.per_core.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Fraction of cores currently busy, in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        self.busy_cores() as f64 / self.total_cores() as f64
    }

    /// Metrics aggregated over every completed run.
    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.lifetime).clone()
    }

    /// Release the memory of every submitted process that still holds some.
    ///
    /// Only meaningful while stopped; returns the number of processes freed.
    pub fn release_all_memory(&self) -> usize {
        if self.is_running() {
            return 0;
        }
        let order = lock(&self.submitted).order.clone();
        let mut freed = 0;
        for pid in order {
            let Some(handle) = self.shared.table.get(pid) else {
                continue;
            };
            let mut p = lock_process(&handle);
            if p.has_memory() {
                self.shared.memory.deallocate_for(&mut p);
                freed += 1;
            }
        }
        freed
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
