//! Contiguous first-fit allocator.
//!
//! The arena is tiled by runs keyed by start offset. Each run is either free
//! or owned by one pid. Releasing a run only flips it back to free; adjacent
//! free runs are merged lazily, when an allocation scan walks across them.
//! Between those scans the free space can be split into holes, which is what
//! [`FlatAllocator::external_fragmentation`] measures.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use super::{AllocatorKind, Allocator, Placement};
use crate::process::Pid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Run {
    len: usize,
    owner: Option<Pid>,
}

/// First-fit contiguous allocator over a fixed-size arena.
#[derive(Debug)]
pub struct FlatAllocator {
    capacity: usize,
    used: usize,
    /// Start offset → run. Runs tile `[0, capacity)` without gaps.
    runs: BTreeMap<usize, Run>,
    /// Live reservations: pid → (offset, len).
    owners: HashMap<Pid, (usize, usize)>,
}

impl FlatAllocator {
    /// Create an empty arena of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FlatAllocator capacity must be > 0");
        let mut runs = BTreeMap::new();
        runs.insert(
            0,
            Run {
                len: capacity,
                owner: None,
            },
        );
        Self {
            capacity,
            used: 0,
            runs,
            owners: HashMap::new(),
        }
    }

    /// Release the run starting at `offset`.
    ///
    /// `size` must match the reserved length; a mismatch or an offset that
    /// is not the start of an occupied run is ignored. Returns bytes freed.
    pub fn deallocate_at(&mut self, offset: usize, size: usize) -> usize {
        let Some(run) = self.runs.get_mut(&offset) else {
            return 0;
        };
        let Some(owner) = run.owner else {
            return 0;
        };
        if run.len != size {
            log::warn!(
                "flat: release of {size} bytes at {offset} does not match run of {} bytes",
                run.len
            );
            return 0;
        }
        run.owner = None;
        self.owners.remove(&owner);
        self.used -= size;
        size
    }

    /// Offset and length held by `pid`.
    pub fn reservation(&self, pid: Pid) -> Option<(usize, usize)> {
        self.owners.get(&pid).copied()
    }

    /// Length of the largest contiguous free span (adjacent free runs count
    /// as one span).
    pub fn largest_free_span(&self) -> usize {
        let mut best = 0;
        let mut span = 0;
        for run in self.runs.values() {
            if run.owner.is_none() {
                span += run.len;
                best = best.max(span);
            } else {
                span = 0;
            }
        }
        best
    }

    /// Number of runs currently tracked (free and occupied).
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Merge every group of adjacent free runs into one.
    pub fn coalesce_free_runs(&mut self) {
        let mut merged: BTreeMap<usize, Run> = BTreeMap::new();
        let mut pending: Option<(usize, usize)> = None;
        for (&start, run) in &self.runs {
            match (run.owner, pending.as_mut()) {
                (None, Some((_, len))) => *len += run.len,
                (None, None) => pending = Some((start, run.len)),
                (Some(_), _) => {
                    if let Some((s, len)) = pending.take() {
                        merged.insert(s, Run { len, owner: None });
                    }
                    merged.insert(start, *run);
                }
            }
        }
        if let Some((s, len)) = pending {
            merged.insert(s, Run { len, owner: None });
        }
        self.runs = merged;
    }

    /// First free span of at least `size` bytes: `(start, span_len, run starts)`.
    fn find_first_fit(&self, size: usize) -> Option<(usize, usize, Vec<usize>)> {
        let mut start = 0;
        let mut span = 0;
        let mut members: Vec<usize> = Vec::new();
        for (&offset, run) in &self.runs {
            if run.owner.is_some() {
                span = 0;
                members.clear();
                continue;
            }
            if members.is_empty() {
                start = offset;
            }
            members.push(offset);
            span += run.len;
            if span >= size {
                return Some((start, span, members));
            }
        }
        None
    }
}

impl Allocator for FlatAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Flat
    }

    fn allocate(&mut self, size: usize, pid: Pid) -> Option<Placement> {
        if size == 0 || size > self.capacity - self.used || self.owners.contains_key(&pid) {
            return None;
        }
        let (start, span, members) = self.find_first_fit(size)?;

        // Lazily merge the span, then split off the tail as a new free run.
        for offset in &members {
            self.runs.remove(offset);
        }
        self.runs.insert(
            start,
            Run {
                len: size,
                owner: Some(pid),
            },
        );
        if span > size {
            self.runs.insert(
                start + size,
                Run {
                    len: span - size,
                    owner: None,
                },
            );
        }

        self.owners.insert(pid, (start, size));
        self.used += size;
        Some(Placement::Contiguous {
            offset: start,
            len: size,
        })
    }

    fn deallocate(&mut self, pid: Pid) -> usize {
        match self.owners.get(&pid).copied() {
            Some((offset, len)) => self.deallocate_at(offset, len),
            None => 0,
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.used
    }

    fn external_fragmentation(&self) -> usize {
        self.free() - self.largest_free_span()
    }

    fn process_count(&self) -> usize {
        self.owners.len()
    }

    fn holds(&self, pid: Pid) -> bool {
        self.owners.contains_key(&pid)
    }

    fn visualize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "flat memory: {} / {} bytes used, {} process(es), external fragmentation {} bytes",
            self.used,
            self.capacity,
            self.owners.len(),
            self.external_fragmentation()
        );
        for (&start, run) in &self.runs {
            let end = start + run.len;
            match run.owner {
                Some(pid) => {
                    let _ = writeln!(out, "[{start:>10}, {end:>10})  pid {pid:<6} {} bytes", run.len);
                }
                None => {
                    let _ = writeln!(out, "[{start:>10}, {end:>10})  free       {} bytes", run.len);
                }
            }
        }
        out
    }
}
