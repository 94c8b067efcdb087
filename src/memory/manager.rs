//! Process-level memory manager shared by every worker.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{AllocError, Allocator, AllocatorKind, FlatAllocator, PagingAllocator};
use crate::process::Process;

/// Aggregate memory statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub kind: AllocatorKind,
    pub total: usize,
    pub used: usize,
    pub free: usize,
    pub external_fragmentation: usize,
    pub process_count: usize,
}

/// Owns one allocator and serializes every call into it.
///
/// `allocate_for` / `deallocate_for` keep [`Process::has_memory`] in step
/// with the allocator: the flag is flipped while the allocator lock is held,
/// so no observer sees a reservation without the flag or the reverse.
#[derive(Debug)]
pub struct MemoryManager {
    allocator: Mutex<Box<dyn Allocator>>,
}

impl MemoryManager {
    pub fn new(allocator: Box<dyn Allocator>) -> Self {
        Self {
            allocator: Mutex::new(allocator),
        }
    }

    /// First-fit contiguous memory of `capacity` bytes.
    pub fn flat(capacity: usize) -> Self {
        Self::new(Box::new(FlatAllocator::new(capacity)))
    }

    /// Paged memory of `capacity` bytes in `frame_size` frames.
    pub fn paging(capacity: usize, frame_size: usize) -> Self {
        Self::new(Box::new(PagingAllocator::new(capacity, frame_size)))
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, Box<dyn Allocator>> {
        match self.allocator.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Reserve the process's footprint.
    ///
    /// Succeeds without touching the allocator when the process already holds
    /// memory or has a zero-byte footprint.
    pub fn allocate_for(&self, process: &mut Process) -> Result<(), AllocError> {
        if process.has_memory() || process.memory_size() == 0 {
            return Ok(());
        }
        let mut alloc = self.lock();
        match alloc.allocate(process.memory_size(), process.pid()) {
            Some(placement) => {
                process.set_has_memory(true);
                log::debug!(
                    "memory: pid {} reserved {} bytes ({:?})",
                    process.pid(),
                    placement.reserved_bytes(),
                    alloc.kind()
                );
                Ok(())
            }
            None => Err(AllocError::Exhausted {
                pid: process.pid(),
                requested: process.memory_size(),
                free: alloc.free(),
            }),
        }
    }

    /// Release the process's reservation. No-op if it holds none.
    pub fn deallocate_for(&self, process: &mut Process) {
        if !process.has_memory() {
            return;
        }
        let mut alloc = self.lock();
        let released = alloc.deallocate(process.pid());
        process.set_has_memory(false);
        log::debug!("memory: pid {} released {released} bytes", process.pid());
    }

    pub fn kind(&self) -> AllocatorKind {
        self.lock().kind()
    }

    pub fn total_memory(&self) -> usize {
        self.lock().capacity()
    }

    pub fn free_memory(&self) -> usize {
        self.lock().free()
    }

    pub fn external_fragmentation(&self) -> usize {
        self.lock().external_fragmentation()
    }

    pub fn process_count(&self) -> usize {
        self.lock().process_count()
    }

    /// All statistics from one consistent view of the allocator.
    pub fn stats(&self) -> MemoryStats {
        let alloc = self.lock();
        MemoryStats {
            kind: alloc.kind(),
            total: alloc.capacity(),
            used: alloc.used(),
            free: alloc.free(),
            external_fragmentation: alloc.external_fragmentation(),
            process_count: alloc.process_count(),
        }
    }

    pub fn visualize(&self) -> String {
        self.lock().visualize()
    }
}
