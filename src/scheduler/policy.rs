//! Scheduling discipline and scheduler construction parameters.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a dispatched process may keep its core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// First-come-first-served: run to completion, no preemption.
    Fcfs,
    /// Round-robin: at most `quantum` instructions per dispatch, then back to
    /// the tail of the ready queue.
    RoundRobin { quantum: NonZeroU32 },
}

impl SchedulingPolicy {
    /// Round-robin with `quantum` instructions per slice. `None` if 0.
    pub fn round_robin(quantum: u32) -> Option<Self> {
        NonZeroU32::new(quantum).map(|quantum| Self::RoundRobin { quantum })
    }

    /// Instructions a single dispatch may execute; `None` is unbounded.
    #[inline]
    pub fn slice_budget(self) -> Option<u32> {
        match self {
            Self::Fcfs => None,
            Self::RoundRobin { quantum } => Some(quantum.get()),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fcfs => f.write_str("fcfs"),
            Self::RoundRobin { quantum } => write!(f, "rr(quantum={quantum})"),
        }
    }
}

/// Scheduler construction parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of emulated cores (one worker thread each). Must be > 0.
    pub cores: usize,
    pub policy: SchedulingPolicy,
    /// Sleep after every executed instruction.
    pub instruction_delay: Duration,
    /// Sleep before requeueing a process whose memory could not be reserved.
    pub alloc_backoff: Duration,
}

impl SchedulerConfig {
    pub fn new(cores: usize, policy: SchedulingPolicy) -> Self {
        Self {
            cores,
            policy,
            ..Self::default()
        }
    }

    pub fn with_instruction_delay(mut self, delay: Duration) -> Self {
        self.instruction_delay = delay;
        self
    }

    pub fn with_alloc_backoff(mut self, backoff: Duration) -> Self {
        self.alloc_backoff = backoff;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cores: 4,
            policy: SchedulingPolicy::RoundRobin {
                quantum: NonZeroU32::MIN.saturating_add(4),
            },
            instruction_delay: Duration::ZERO,
            alloc_backoff: Duration::from_millis(10),
        }
    }
}
