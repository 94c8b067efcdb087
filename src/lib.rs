//! Multi-core process scheduler and memory manager emulator.
//!
//! ## Scope
//! Emulates a fixed number of CPU cores executing synthetic processes under
//! first-come-first-served or round-robin scheduling, while a pluggable
//! allocator (contiguous first-fit or frame-based paging) tracks how much of
//! a bounded address space each process occupies.
//!
//! ## Key invariants
//! - A process is in at most one place at a time: the ready queue or exactly
//!   one core.
//! - Under round-robin a dispatch executes at most `quantum` instructions.
//! - Bytes (or frames) reserved for live processes never exceed capacity, and
//!   `Process::has_memory` always matches the allocator's view.
//! - `stop()` is safe at any moment, including while paused, and joins every
//!   thread it started.
//!
//! ## Flow
//! `Emulator::spawn -> ProcessTable -> Scheduler::add_process -> ready queue
//! -> dispatch thread -> core worker -> MemoryManager -> execute -> finish |
//! requeue`
//!
//! ## Notable entry points
//! - [`Emulator`]: owns every component; built from a [`Config`].
//! - [`Scheduler`] / [`SchedulingPolicy`]: the scheduling engine.
//! - [`MemoryManager`] with [`FlatAllocator`] / [`PagingAllocator`].
//! - [`UtilizationReport`]: CPU and memory snapshot, text or JSON.

pub mod config;
pub mod emulator;
pub mod generator;
pub mod logging;
pub mod memory;
pub mod process;
pub mod report;
pub mod scheduler;
pub mod stdx;
#[cfg(test)]
pub mod test_utils;

pub use config::{Config, ConfigError, SchedulerKind};
pub use emulator::{Emulator, EmulatorError};
pub use generator::{BatchSpawner, GeneratedProcess, ProcessGenerator, SharedGenerator};
pub use memory::{
    AllocError, Allocator, AllocatorKind, FlatAllocator, MemoryManager, MemoryStats, PagingAllocator, Placement,
};
pub use process::{CoreId, Instruction, Pid, Process, ProcessState, ProcessTable, SpawnError};
pub use report::UtilizationReport;
pub use scheduler::{
    MetricsSnapshot, RecordingTrace, SchedTraceEvent, Scheduler, SchedulerConfig, SchedulerSnapshot,
    SchedulingPolicy, TraceSink,
};
