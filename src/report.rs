//! CPU and memory utilization report.
//!
//! [`UtilizationReport::capture`] takes a snapshot of the scheduler, the
//! process table and the memory manager; [`render`](UtilizationReport::render)
//! prints it in the plain-text monitor layout, and the serde derives give the
//! same data as JSON.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::memory::{MemoryManager, MemoryStats};
use crate::process::{lock_process, CoreId, Pid, ProcessState, ProcessTable};
use crate::scheduler::{CoreView, MetricsSnapshot, Scheduler};

const RULE: &str = "---------------------------------------";

/// One process row.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessLine {
    pub pid: Pid,
    pub name: String,
    pub created_at: DateTime<Local>,
    pub state: ProcessState,
    pub core: Option<CoreId>,
    pub executed: usize,
    pub total: usize,
}

/// Point-in-time utilization snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct UtilizationReport {
    pub generated_at: DateTime<Local>,
    pub policy: String,
    /// Busy cores as a percentage of all cores.
    pub cpu_utilization: f64,
    pub cores_used: usize,
    pub cores_available: usize,
    pub cpu_cycles: u64,
    pub core_instructions: Vec<u64>,
    pub cores: Vec<CoreView>,
    /// Submitted and not finished, in pid order.
    pub running: Vec<ProcessLine>,
    /// Finished, in pid order.
    pub finished: Vec<ProcessLine>,
    pub memory: MemoryStats,
    pub metrics: MetricsSnapshot,
}

impl UtilizationReport {
    pub fn capture(scheduler: &Scheduler, table: &ProcessTable, memory: &MemoryManager) -> Self {
        let running_on = scheduler.running_processes();
        let cores_used = running_on.len();
        let total = scheduler.total_cores();

        let mut running = Vec::new();
        let mut finished = Vec::new();
        for handle in table.handles() {
            let p = lock_process(&handle);
            let line = ProcessLine {
                pid: p.pid(),
                name: p.name().to_string(),
                created_at: p.created_at(),
                state: p.state(),
                core: running_on.get(&p.pid()).copied(),
                executed: p.cursor(),
                total: p.total_instructions(),
            };
            if p.state() == ProcessState::Finished {
                finished.push(line);
            } else {
                running.push(line);
            }
        }

        Self {
            generated_at: Local::now(),
            policy: scheduler.config().policy.to_string(),
            cpu_utilization: cores_used as f64 * 100.0 / total as f64,
            cores_used,
            cores_available: total - cores_used,
            cpu_cycles: scheduler.cpu_cycles(),
            core_instructions: scheduler.core_instructions(),
            cores: scheduler.core_views(),
            running,
            finished,
            memory: memory.stats(),
            metrics: scheduler.metrics(),
        }
    }

    /// Plain-text monitor layout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CPU utilization: {:.0}%", self.cpu_utilization);
        let _ = writeln!(out, "Cores used: {}", self.cores_used);
        let _ = writeln!(out, "Cores available: {}", self.cores_available);
        let _ = writeln!(out);
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Running processes:");
        for p in &self.running {
            let core = match p.core {
                Some(c) => c.to_string(),
                None => "-".to_string(),
            };
            let _ = writeln!(
                out,
                "{}\t{}\t\tCore: {core}\t{} / {}",
                p.name,
                format_timestamp(&p.created_at),
                p.executed,
                p.total
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Finished processes:");
        for p in &self.finished {
            let _ = writeln!(
                out,
                "{}\t{}\t\tFinished\t{} / {}",
                p.name,
                format_timestamp(&p.created_at),
                p.total,
                p.total
            );
        }
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Memory Status ({}):", self.memory.kind);
        let _ = writeln!(
            out,
            "Memory Usage: {}KB / {}KB",
            self.memory.used / 1024,
            self.memory.total / 1024
        );
        let _ = writeln!(
            out,
            "External Fragmentation: {}KB",
            self.memory.external_fragmentation / 1024
        );
        let _ = writeln!(out, "Processes in Memory: {}", self.memory.process_count);
        let _ = writeln!(out, "CPU cycles: {}", self.cpu_cycles);
        for view in &self.cores {
            let _ = match (view.current, view.remaining_quantum) {
                (None, _) => writeln!(out, "Core {}: idle", view.core),
                (Some(pid), None) => writeln!(out, "Core {}: pid {pid}", view.core),
                (Some(pid), Some(left)) => {
                    writeln!(out, "Core {}: pid {pid} ({left} left in slice)", view.core)
                }
            };
        }
        out
    }

    /// Write [`render`](Self::render) output to `path`, replacing it.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// `(MM/DD/YYYY hh:mm:ssAM)` in local time.
pub fn format_timestamp(t: &DateTime<Local>) -> String {
    t.format("(%m/%d/%Y %I:%M:%S%p)").to_string()
}
