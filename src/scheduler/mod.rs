//! Multi-core process scheduler.
//!
//! # Architecture
//!
//! ```text
//!   add_process ──► ReadyQueue ──► dispatch thread ──► CoreTable slot N ──► worker N
//!                       ▲                                                    │
//!                       └──────────── preempt / defer (tail) ◄───────────────┘
//! ```
//!
//! One [`Scheduler`] serves both disciplines; [`SchedulingPolicy`] decides
//! whether a dispatch carries a quantum. Workers reserve memory on first
//! dispatch through the shared [`MemoryManager`](crate::memory::MemoryManager)
//! and release it when the process finishes.
//!
//! # Invariants
//!
//! - A pid is in at most one of {ready queue, one core slot}.
//! - Under FCFS a dispatched process is never requeued, except after a
//!   failed memory reservation or on `stop()`.
//! - Under round-robin a slice executes at most `quantum` instructions.

mod cores;
mod dispatch;
pub mod metrics;
pub mod policy;
mod runtime;
pub mod trace;
mod worker;

pub use cores::CoreView;
pub use metrics::{Log2Hist, MetricsSnapshot, WorkerMetricsLocal};
pub use policy::{SchedulerConfig, SchedulingPolicy};
pub use runtime::{Scheduler, SchedulerSnapshot};
pub use trace::{NoopTrace, RecordingTrace, SchedTraceEvent, TraceSink};
