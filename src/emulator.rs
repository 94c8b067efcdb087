//! Top-level orchestrator: process table, memory manager and scheduler.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::{Config, ConfigError};
use crate::generator::{BatchSpawner, ProcessGenerator, SharedGenerator};
use crate::memory::MemoryManager;
use crate::process::{Instruction, Pid, ProcessTable, SpawnError};
use crate::report::UtilizationReport;
use crate::scheduler::{MetricsSnapshot, Scheduler};
use crate::stdx::XorShift64;

/// Orchestrator failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum EmulatorError {
    Config(ConfigError),
    Spawn(SpawnError),
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Spawn(err) => write!(f, "spawn failed: {err}"),
        }
    }
}

impl std::error::Error for EmulatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Spawn(err) => Some(err),
        }
    }
}

impl From<ConfigError> for EmulatorError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<SpawnError> for EmulatorError {
    fn from(err: SpawnError) -> Self {
        Self::Spawn(err)
    }
}

/// Owns every emulator component and wires them together.
///
/// Dropping the emulator stops the batch spawner and the scheduler, then
/// releases any memory still held by unfinished processes.
pub struct Emulator {
    config: Config,
    table: Arc<ProcessTable>,
    memory: Arc<MemoryManager>,
    scheduler: Arc<Scheduler>,
    generator: SharedGenerator,
    spawner: Mutex<Option<BatchSpawner>>,
}

impl Emulator {
    /// Validate `config` and build the components. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(config: &Config) -> Result<Self, EmulatorError> {
        Self::with_seed(config, XorShift64::from_entropy().next_u64())
    }

    /// Like [`new`](Self::new) with a fixed workload seed.
    pub fn with_seed(config: &Config, seed: u64) -> Result<Self, EmulatorError> {
        let sched_cfg = config.scheduler_config()?;
        let table = Arc::new(ProcessTable::new());
        let memory = Arc::new(config.memory_manager());
        let scheduler = Arc::new(Scheduler::new(sched_cfg, Arc::clone(&table), Arc::clone(&memory)));
        log::info!(
            "emulator: {} cores, {} scheduler, {} memory of {} bytes",
            config.num_cpu,
            scheduler.config().policy,
            memory.kind(),
            memory.total_memory()
        );
        Ok(Self {
            config: config.clone(),
            table,
            memory,
            scheduler,
            generator: Arc::new(Mutex::new(ProcessGenerator::new(config, seed))),
            spawner: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Create a process and submit it. Duplicate names are rejected.
    pub fn spawn(&self, name: &str, instructions: Vec<Instruction>, memory_size: usize) -> Result<Pid, EmulatorError> {
        let pid = self.table.spawn(name, instructions, memory_size)?;
        self.scheduler.add_process(pid);
        Ok(pid)
    }

    /// Create a random process within the configured ranges and submit it.
    pub fn spawn_generated(&self) -> Result<Pid, EmulatorError> {
        let pid = lock(&self.generator).spawn_into(&self.table)?;
        self.scheduler.add_process(pid);
        Ok(pid)
    }

    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    /// Stop the batch spawner (if any) and the scheduler.
    pub fn stop(&self) -> MetricsSnapshot {
        self.stop_batch();
        self.scheduler.stop()
    }

    pub fn pause(&self) -> bool {
        self.scheduler.pause()
    }

    pub fn resume(&self) -> bool {
        self.scheduler.resume()
    }

    /// Spawn a generated process every `batch-process-freq × tick` until
    /// [`stop_batch`](Self::stop_batch). Returns `false` if already running.
    pub fn start_batch(&self, tick: Duration) -> bool {
        let mut spawner = lock(&self.spawner);
        if spawner.is_some() {
            return false;
        }
        let interval = tick.saturating_mul(self.config.batch_process_freq);
        *spawner = Some(BatchSpawner::start(
            Arc::clone(&self.generator),
            Arc::clone(&self.table),
            Arc::clone(&self.scheduler),
            interval,
        ));
        true
    }

    /// Returns the number of processes the spawner created.
    pub fn stop_batch(&self) -> u64 {
        let spawner = lock(&self.spawner).take();
        match spawner {
            Some(mut s) => s.stop(),
            None => 0,
        }
    }

    /// Block until every submitted process has finished or `timeout`
    /// expires. Returns `true` if everything finished.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let done = self.scheduler.finished_processes().len() == self.scheduler.submitted_count();
            if done {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn report(&self) -> UtilizationReport {
        UtilizationReport::capture(&self.scheduler, &self.table, &self.memory)
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.stop();
        let freed = self.scheduler.release_all_memory();
        if freed > 0 {
            log::debug!("emulator: released memory of {freed} unfinished processes");
        }
    }
}

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}
