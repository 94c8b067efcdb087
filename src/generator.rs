//! Synthetic workload: random processes and a background batch spawner.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::process::{Instruction, Pid, ProcessTable, SpawnError};
use crate::scheduler::Scheduler;
use crate::stdx::{PauseGate, XorShift64};

/// A process description ready to be spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedProcess {
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub memory_size: usize,
}

/// Produces `process_<n>` workloads within the configured ranges.
///
/// Instruction counts are uniform in `[min_ins, max_ins]`; footprints are a
/// uniformly chosen power of two in `[min_mem, max_mem]`.
#[derive(Debug)]
pub struct ProcessGenerator {
    rng: XorShift64,
    next_index: u64,
    min_ins: u32,
    max_ins: u32,
    min_mem_log2: u32,
    max_mem_log2: u32,
}

impl ProcessGenerator {
    /// Generator over `cfg`'s ranges. Memory bounds are rounded down to a
    /// power of two.
    pub fn new(cfg: &Config, seed: u64) -> Self {
        let log2 = |v: u32| v.max(1).ilog2();
        Self {
            rng: XorShift64::new(seed),
            next_index: 1,
            min_ins: cfg.min_ins,
            max_ins: cfg.max_ins.max(cfg.min_ins),
            min_mem_log2: log2(cfg.min_mem_per_proc),
            max_mem_log2: log2(cfg.max_mem_per_proc).max(log2(cfg.min_mem_per_proc)),
        }
    }

    pub fn generate(&mut self) -> GeneratedProcess {
        let name = format!("process_{}", self.next_index);
        self.next_index += 1;

        let count = self.rng.range_inclusive(self.min_ins, self.max_ins) as usize;
        let message = format!("Hello world from {name}!");
        let instructions = vec![Instruction::Print { message }; count];

        let exp = self.rng.range_inclusive(self.min_mem_log2, self.max_mem_log2);
        GeneratedProcess {
            name,
            instructions,
            memory_size: 1usize << exp,
        }
    }

    /// Generate and insert into `table`, skipping names already taken.
    pub fn spawn_into(&mut self, table: &ProcessTable) -> Result<Pid, SpawnError> {
        loop {
            let p = self.generate();
            match table.spawn(&p.name, p.instructions, p.memory_size) {
                Err(SpawnError::DuplicateName { name }) => {
                    log::debug!("generator: {name} taken, skipping");
                }
                other => return other,
            }
        }
    }
}

/// One generator shared by interactive and batch spawning so that names
/// keep counting up across both.
pub type SharedGenerator = Arc<Mutex<ProcessGenerator>>;

#[inline]
fn lock_generator(generator: &SharedGenerator) -> MutexGuard<'_, ProcessGenerator> {
    match generator.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

/// Background thread spawning one generated process every `interval`.
///
/// Stopped explicitly with [`stop`](Self::stop) or on drop.
pub struct BatchSpawner {
    gate: Arc<PauseGate>,
    thread: Option<JoinHandle<u64>>,
}

impl BatchSpawner {
    /// Start spawning into `table` and submitting to `scheduler`.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the thread.
    pub fn start(
        generator: SharedGenerator,
        table: Arc<ProcessTable>,
        scheduler: Arc<Scheduler>,
        interval: Duration,
    ) -> Self {
        let gate = Arc::new(PauseGate::new());
        let thread = {
            let gate = Arc::clone(&gate);
            thread::Builder::new()
                .name("batch-spawner".into())
                .spawn(move || {
                    let mut spawned = 0u64;
                    while !gate.stall(interval).is_stopped() {
                        let spawned_pid = lock_generator(&generator).spawn_into(&table);
                        match spawned_pid {
                            Ok(pid) => {
                                scheduler.add_process(pid);
                                spawned += 1;
                            }
                            Err(e) => log::warn!("batch spawner: {e}"),
                        }
                    }
                    spawned
                })
                .expect("failed to spawn batch spawner thread")
        };
        log::info!("batch spawner: one process every {interval:?}");
        Self {
            gate,
            thread: Some(thread),
        }
    }

    /// Stop the thread and return how many processes it spawned.
    pub fn stop(&mut self) -> u64 {
        self.gate.stop();
        let spawned = match self.thread.take().map(JoinHandle::join) {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                log::error!("batch spawner thread panicked");
                0
            }
            None => return 0,
        };
        log::info!("batch spawner: stopped after {spawned} processes");
        spawned
    }
}

impl Drop for BatchSpawner {
    fn drop(&mut self) {
        self.stop();
    }
}
