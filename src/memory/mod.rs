//! Memory management: allocation strategies and the shared manager.
//!
//! # Architecture
//!
//! ```text
//!   Worker ──allocate_for(process)──►  MemoryManager
//!                                        │ Mutex
//!                                        ▼
//!                                  Box<dyn Allocator>
//!                                   ├─ FlatAllocator    (first-fit runs)
//!                                   └─ PagingAllocator  (fixed frames)
//! ```
//!
//! Allocation failure is an ordinary value ([`AllocError::Exhausted`]); the
//! scheduler requeues the process and tries again later.
//!
//! # Invariants (all strategies)
//!
//! - Bytes attributed to live reservations never exceed `capacity()`.
//! - At most one reservation per pid.
//! - Releasing a pid without a reservation is a no-op.

mod flat;
mod manager;
mod paging;

pub use flat::FlatAllocator;
pub use manager::{MemoryManager, MemoryStats};
pub use paging::PagingAllocator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::process::Pid;

/// Which allocation strategy backs a [`MemoryManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    Flat,
    Paging,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::Paging => f.write_str("paging"),
        }
    }
}

/// Where a successful allocation landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// One contiguous run `[offset, offset + len)`.
    Contiguous { offset: usize, len: usize },
    /// A set of whole frames, in the order they were taken.
    Frames { frames: Vec<usize>, frame_size: usize },
}

impl Placement {
    /// Bytes actually reserved (frame-rounded for paging).
    pub fn reserved_bytes(&self) -> usize {
        match self {
            Self::Contiguous { len, .. } => *len,
            Self::Frames { frames, frame_size } => frames.len() * frame_size,
        }
    }
}

/// Allocation failure. Recoverable: the caller retries later.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AllocError {
    /// No region (flat) or not enough frames (paging) for the request.
    Exhausted {
        pid: Pid,
        requested: usize,
        free: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                pid,
                requested,
                free,
            } => write!(
                f,
                "cannot place {requested} bytes for pid {pid} ({free} bytes free)"
            ),
        }
    }
}

impl std::error::Error for AllocError {}

/// Contract shared by every allocation strategy.
///
/// Implementations are single-threaded; [`MemoryManager`] serializes access.
pub trait Allocator: Send + fmt::Debug {
    fn kind(&self) -> AllocatorKind;

    /// Reserve `size` bytes for `pid`.
    ///
    /// Returns `None` when the request cannot be satisfied right now, when
    /// `size` is zero, or when `pid` already holds a reservation.
    fn allocate(&mut self, size: usize, pid: Pid) -> Option<Placement>;

    /// Release everything held by `pid`. Returns the bytes released
    /// (0 if `pid` held nothing).
    fn deallocate(&mut self, pid: Pid) -> usize;

    /// Total addressable bytes.
    fn capacity(&self) -> usize;

    /// Bytes currently reserved.
    fn used(&self) -> usize;

    /// Bytes currently unreserved.
    fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Free bytes that a single new allocation could not use.
    fn external_fragmentation(&self) -> usize;

    /// Number of pids holding a reservation.
    fn process_count(&self) -> usize;

    fn holds(&self, pid: Pid) -> bool;

    /// Human-readable, deterministic memory map.
    fn visualize(&self) -> String;
}
