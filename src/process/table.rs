//! Authoritative process store.
//!
//! The table owns every [`Process`] for the lifetime of the emulator run.
//! Records are never removed: finished processes stay visible for reporting.
//! Everyone else holds a [`Pid`] and resolves it here.
//!
//! # Locking
//!
//! - The table's `RwLock` guards only the index (pid → handle, name → pid).
//!   It is held for lookups and inserts, never while a process is executing.
//! - Each process sits behind its own `Mutex`; a worker locks one process for
//!   one instruction at a time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Instruction, Pid, Process};

/// Shared handle to one process record.
pub type ProcessHandle = Arc<Mutex<Process>>;

/// Errors from process creation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpawnError {
    /// A live process already uses this name.
    DuplicateName { name: String },
    /// Names must be non-empty.
    EmptyName,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName { name } => write!(f, "process name already in use: {name}"),
            Self::EmptyName => write!(f, "process name must not be empty"),
        }
    }
}

impl std::error::Error for SpawnError {}

#[derive(Debug, Default)]
struct Index {
    by_pid: BTreeMap<Pid, ProcessHandle>,
    by_name: HashMap<String, Pid>,
    next_pid: u32,
}

/// Arena of processes keyed by [`Pid`].
#[derive(Debug, Default)]
pub struct ProcessTable {
    index: RwLock<Index>,
}

/// Lock a process record, recovering from poison.
#[inline]
pub(crate) fn lock_process(handle: &ProcessHandle) -> MutexGuard<'_, Process> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        match self.index.read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        match self.index.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Create a process and return its pid.
    ///
    /// Pids are assigned monotonically starting at 1.
    pub fn spawn(
        &self,
        name: &str,
        instructions: Vec<Instruction>,
        memory_size: usize,
    ) -> Result<Pid, SpawnError> {
        if name.is_empty() {
            return Err(SpawnError::EmptyName);
        }
        let mut idx = self.write();
        if idx.by_name.contains_key(name) {
            return Err(SpawnError::DuplicateName {
                name: name.to_string(),
            });
        }
        idx.next_pid += 1;
        let pid = Pid(idx.next_pid);
        let process = Process::new(pid, name, instructions, memory_size);
        idx.by_pid.insert(pid, Arc::new(Mutex::new(process)));
        idx.by_name.insert(name.to_string(), pid);
        Ok(pid)
    }

    /// Pid that the next successful [`spawn`](Self::spawn) will receive.
    pub fn next_pid(&self) -> Pid {
        Pid(self.read().next_pid + 1)
    }

    /// Resolve a pid to its handle.
    pub fn get(&self, pid: Pid) -> Option<ProcessHandle> {
        self.read().by_pid.get(&pid).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Pid> {
        self.read().by_name.get(name).copied()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.read().by_pid.contains_key(&pid)
    }

    /// Run `f` with the process locked. Returns `None` for unknown pids.
    pub fn with<R>(&self, pid: Pid, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
        let handle = self.get(pid)?;
        let mut guard = lock_process(&handle);
        Some(f(&mut guard))
    }

    /// All pids in ascending order.
    pub fn pids(&self) -> Vec<Pid> {
        self.read().by_pid.keys().copied().collect()
    }

    /// All handles in pid order.
    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.read().by_pid.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
