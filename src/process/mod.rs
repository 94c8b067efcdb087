//! Process records and the process table.
//!
//! A [`Process`] is plain data: identity, lifecycle state, an instruction
//! cursor and a memory footprint. The scheduler never owns processes; it
//! refers to them by [`Pid`] and borrows them through the [`ProcessTable`]
//! for the duration of one step.

mod table;

pub(crate) use table::lock_process;
pub use table::{ProcessHandle, ProcessTable, SpawnError};

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Process identifier. Assigned monotonically from 1 by the [`ProcessTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Index of an emulated CPU core (`0..num_cores`).
pub type CoreId = usize;

/// Lifecycle state.
///
/// `Waiting` is reserved; the scheduler only drives
/// `Ready -> Running -> Finished` and `Running -> Ready`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Ready,
    Running,
    Waiting,
    Finished,
}

/// One synthetic instruction.
///
/// The scheduler never inspects instruction contents; it only asks whether
/// another one exists and executes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Append `message` to the process output log.
    Print { message: String },
}

/// Lines kept per process; older output is dropped first.
pub const OUTPUT_LOG_CAPACITY: usize = 100;

/// A line produced by an executed [`Instruction::Print`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputLine {
    pub at: DateTime<Local>,
    pub core: CoreId,
    pub message: String,
}

/// A schedulable unit of work.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    name: String,
    state: ProcessState,
    instructions: Vec<Instruction>,
    cursor: usize,
    core: Option<CoreId>,
    memory_size: usize,
    has_memory: bool,
    created_at: DateTime<Local>,
    output: VecDeque<OutputLine>,
    printed: usize,
}

impl Process {
    /// Create a `Ready` process. Normally called through [`ProcessTable::spawn`].
    pub fn new(pid: Pid, name: impl Into<String>, instructions: Vec<Instruction>, memory_size: usize) -> Self {
        Self {
            pid,
            name: name.into(),
            state: ProcessState::Ready,
            instructions,
            cursor: 0,
            core: None,
            memory_size,
            has_memory: false,
            created_at: Local::now(),
            output: VecDeque::new(),
            printed: 0,
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    /// Core currently executing this process.
    #[inline]
    pub fn core(&self) -> Option<CoreId> {
        self.core
    }

    #[inline]
    pub fn set_core(&mut self, core: Option<CoreId>) {
        self.core = core;
    }

    /// Index of the next instruction to execute.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total number of instructions.
    #[inline]
    pub fn total_instructions(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn remaining_instructions(&self) -> usize {
        self.instructions.len() - self.cursor
    }

    #[inline]
    pub fn has_next_instruction(&self) -> bool {
        self.cursor < self.instructions.len()
    }

    /// True once the cursor has consumed every instruction.
    #[inline]
    pub fn is_finished(&self) -> bool {
        !self.has_next_instruction()
    }

    /// Execute the instruction under the cursor on `core` and advance.
    ///
    /// Returns `false` (and does nothing) if no instruction remains.
    pub fn execute_next(&mut self, core: CoreId) -> bool {
        let Some(instruction) = self.instructions.get(self.cursor) else {
            return false;
        };
        match instruction {
            Instruction::Print { message } => {
                if self.output.len() == OUTPUT_LOG_CAPACITY {
                    self.output.pop_front();
                }
                self.output.push_back(OutputLine {
                    at: Local::now(),
                    core,
                    message: message.clone(),
                });
                self.printed += 1;
            }
        }
        self.cursor += 1;
        true
    }

    /// Footprint in bytes.
    #[inline]
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    #[inline]
    pub fn has_memory(&self) -> bool {
        self.has_memory
    }

    /// Only the memory manager flips this flag.
    #[inline]
    pub(crate) fn set_has_memory(&mut self, held: bool) {
        self.has_memory = held;
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// The most recent [`OUTPUT_LOG_CAPACITY`] lines, oldest first.
    pub fn output(&self) -> &VecDeque<OutputLine> {
        &self.output
    }

    /// Lines printed since creation, including ones no longer retained.
    #[inline]
    pub fn printed(&self) -> usize {
        self.printed
    }
}
