//! Frame-based paging allocator.
//!
//! The arena is split into `num_frames` frames of `frame_size` bytes. A
//! request takes `ceil(size / frame_size)` frames from the free list in
//! whatever order the list yields them; since any free frame is as good as
//! any other, there is no external fragmentation. The unused tail of a
//! process's last frame (internal fragmentation) is accepted and not
//! reported.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;

use super::{AllocatorKind, Allocator, Placement};
use crate::process::Pid;

/// Paging allocator with a FIFO free-frame list.
#[derive(Debug)]
pub struct PagingAllocator {
    frame_size: usize,
    num_frames: usize,
    free_frames: VecDeque<usize>,
    /// Frame index → owner.
    frame_owner: Vec<Option<Pid>>,
    /// Pid → frames it owns.
    by_process: BTreeMap<Pid, Vec<usize>>,
    paged_in: u64,
    paged_out: u64,
}

impl PagingAllocator {
    /// Create an allocator over `capacity` bytes split into `frame_size` frames.
    ///
    /// Bytes beyond the last whole frame are not addressable.
    ///
    /// # Panics
    ///
    /// Panics if `frame_size` is 0 or larger than `capacity`.
    pub fn new(capacity: usize, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        assert!(
            frame_size <= capacity,
            "frame_size {frame_size} exceeds capacity {capacity}"
        );
        let num_frames = capacity / frame_size;
        Self {
            frame_size,
            num_frames,
            free_frames: (0..num_frames).collect(),
            frame_owner: vec![None; num_frames],
            by_process: BTreeMap::new(),
            paged_in: 0,
            paged_out: 0,
        }
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    #[inline]
    pub fn free_frame_count(&self) -> usize {
        self.free_frames.len()
    }

    /// Frames needed for `size` bytes.
    #[inline]
    pub fn frames_for(&self, size: usize) -> usize {
        size.div_ceil(self.frame_size)
    }

    /// Frames currently owned by `pid`.
    pub fn frames_of(&self, pid: Pid) -> &[usize] {
        self.by_process.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Owner of frame `index`, if any.
    pub fn frame_owner(&self, index: usize) -> Option<Pid> {
        self.frame_owner.get(index).copied().flatten()
    }

    /// Cumulative frames handed out.
    pub fn paged_in(&self) -> u64 {
        self.paged_in
    }

    /// Cumulative frames returned.
    pub fn paged_out(&self) -> u64 {
        self.paged_out
    }
}

impl Allocator for PagingAllocator {
    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Paging
    }

    fn allocate(&mut self, size: usize, pid: Pid) -> Option<Placement> {
        if size == 0 || self.by_process.contains_key(&pid) {
            return None;
        }
        let needed = self.frames_for(size);
        if needed > self.free_frames.len() {
            return None;
        }
        let frames: Vec<usize> = self.free_frames.drain(..needed).collect();
        for &frame in &frames {
            debug_assert!(self.frame_owner[frame].is_none());
            self.frame_owner[frame] = Some(pid);
        }
        self.paged_in += needed as u64;
        self.by_process.insert(pid, frames.clone());
        Some(Placement::Frames {
            frames,
            frame_size: self.frame_size,
        })
    }

    fn deallocate(&mut self, pid: Pid) -> usize {
        let Some(frames) = self.by_process.remove(&pid) else {
            return 0;
        };
        for &frame in &frames {
            self.frame_owner[frame] = None;
            self.free_frames.push_back(frame);
        }
        self.paged_out += frames.len() as u64;
        frames.len() * self.frame_size
    }

    fn capacity(&self) -> usize {
        self.num_frames * self.frame_size
    }

    fn used(&self) -> usize {
        (self.num_frames - self.free_frames.len()) * self.frame_size
    }

    fn external_fragmentation(&self) -> usize {
        0
    }

    fn process_count(&self) -> usize {
        self.by_process.len()
    }

    fn holds(&self, pid: Pid) -> bool {
        self.by_process.contains_key(&pid)
    }

    fn visualize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "paging memory: {} / {} frames used ({} bytes each), {} process(es), paged in {}, paged out {}",
            self.num_frames - self.free_frames.len(),
            self.num_frames,
            self.frame_size,
            self.by_process.len(),
            self.paged_in,
            self.paged_out
        );
        for (pid, frames) in &self.by_process {
            let list: Vec<String> = frames.iter().map(usize::to_string).collect();
            let _ = writeln!(out, "pid {pid:<6} frames [{}]", list.join(", "));
        }
        let _ = writeln!(out, "free frames: {}", self.free_frames.len());
        out
    }
}
