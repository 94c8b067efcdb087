//! # Metrics Module
//!
//! Cheap per-worker counters for scheduler observability.
//!
//! ## Design
//!
//! - **Per-worker local metrics**: each worker thread owns a
//!   [`WorkerMetricsLocal`] and updates it with plain integer ops.
//! - **Cache-line aligned**: workers' metrics never share a line.
//! - **Log2 histogram**: slice lengths (instructions per dispatch) are
//!   recorded in O(1).
//! - **Post-run aggregation**: worker threads return their metrics when
//!   joined; `Scheduler::stop` merges them into a [`MetricsSnapshot`].

use serde::Serialize;

/// Log2 histogram for cheap distribution tracking.
///
/// Bucket k covers `[2^k, 2^(k+1))`; bucket 0 covers `[0, 2)`.
#[derive(Clone, Debug)]
pub struct Log2Hist {
    pub buckets: [u64; 64],
    pub count: u64,
    pub sum: u64,
}

impl Default for Log2Hist {
    fn default() -> Self {
        Self::new()
    }
}

impl Log2Hist {
    pub const fn new() -> Self {
        Self {
            buckets: [0; 64],
            count: 0,
            sum: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, v: u64) {
        let b = bucket_index(v);
        self.buckets[b] = self.buckets[b].wrapping_add(1);
        self.count = self.count.wrapping_add(1);
        self.sum = self.sum.wrapping_add(v);
    }

    /// Approximate percentile as the lower bound of the containing bucket.
    ///
    /// Returns `None` if nothing has been recorded.
    pub fn percentile_lower_bound(&self, p: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        debug_assert!((0.0..=1.0).contains(&p), "percentile must be in [0.0, 1.0]");

        let target = ((self.count as f64) * p).ceil() as u64;
        let mut seen = 0u64;
        for (i, &c) in self.buckets.iter().enumerate() {
            seen = seen.wrapping_add(c);
            if seen >= target {
                return Some(bucket_lower_bound(i));
            }
        }
        Some(1u64 << 63)
    }

    #[inline]
    pub fn p50(&self) -> Option<u64> {
        self.percentile_lower_bound(0.50)
    }

    #[inline]
    pub fn p99(&self) -> Option<u64> {
        self.percentile_lower_bound(0.99)
    }

    /// Mean value (0 if empty).
    #[inline]
    pub fn mean(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum / self.count
        }
    }

    pub fn merge(&mut self, other: &Log2Hist) {
        for i in 0..64 {
            self.buckets[i] = self.buckets[i].wrapping_add(other.buckets[i]);
        }
        self.count = self.count.wrapping_add(other.count);
        self.sum = self.sum.wrapping_add(other.sum);
    }
}

#[inline]
fn bucket_index(v: u64) -> usize {
    if v == 0 {
        return 0;
    }
    (63 - v.leading_zeros()) as usize
}

#[inline]
fn bucket_lower_bound(bucket: usize) -> u64 {
    if bucket == 0 {
        0
    } else {
        1u64 << bucket
    }
}

/// Per-worker local metrics.
///
/// NOT thread-safe: owned by exactly one worker thread while it runs and
/// handed back through the thread's join handle.
#[derive(Clone, Debug, Default)]
#[repr(align(64))]
pub struct WorkerMetricsLocal {
    /// Instructions executed on this core.
    pub instructions_executed: u64,
    /// Slices started (one per dispatch that got past allocation).
    pub slices: u64,
    /// Slices that ended with the quantum exhausted.
    pub preemptions: u64,
    /// Processes finished on this core.
    pub completions: u64,
    /// Dispatches deferred because memory could not be reserved.
    pub alloc_failures: u64,
    /// Times this worker blocked on the pause gate.
    pub pause_waits: u64,
    /// Slices cut short by `stop()`.
    pub interrupted: u64,
    _pad: u64,

    /// Instructions executed per slice.
    pub slice_len: Log2Hist,
}

const _: () = {
    assert!(std::mem::align_of::<WorkerMetricsLocal>() >= 64);
};

impl WorkerMetricsLocal {
    pub const fn new() -> Self {
        Self {
            instructions_executed: 0,
            slices: 0,
            preemptions: 0,
            completions: 0,
            alloc_failures: 0,
            pause_waits: 0,
            interrupted: 0,
            _pad: 0,
            slice_len: Log2Hist::new(),
        }
    }
}

/// Aggregated metrics from all workers of one or more runs.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub instructions_executed: u64,
    pub slices: u64,
    pub preemptions: u64,
    pub completions: u64,
    pub alloc_failures: u64,
    pub pause_waits: u64,
    pub interrupted: u64,
    /// Number of worker metric blocks merged (cores × runs).
    pub worker_count: u32,
    #[serde(skip)]
    pub slice_len: Log2Hist,
}

impl MetricsSnapshot {
    pub const fn new() -> Self {
        Self {
            instructions_executed: 0,
            slices: 0,
            preemptions: 0,
            completions: 0,
            alloc_failures: 0,
            pause_waits: 0,
            interrupted: 0,
            worker_count: 0,
            slice_len: Log2Hist::new(),
        }
    }

    /// Fold one worker's counters into the aggregate.
    pub fn merge_worker(&mut self, w: &WorkerMetricsLocal) {
        self.instructions_executed = self.instructions_executed.wrapping_add(w.instructions_executed);
        self.slices = self.slices.wrapping_add(w.slices);
        self.preemptions = self.preemptions.wrapping_add(w.preemptions);
        self.completions = self.completions.wrapping_add(w.completions);
        self.alloc_failures = self.alloc_failures.wrapping_add(w.alloc_failures);
        self.pause_waits = self.pause_waits.wrapping_add(w.pause_waits);
        self.interrupted = self.interrupted.wrapping_add(w.interrupted);
        self.slice_len.merge(&w.slice_len);
        self.worker_count = self.worker_count.wrapping_add(1);
    }

    /// Fold another snapshot (e.g. a previous run) into this one.
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        self.instructions_executed = self.instructions_executed.wrapping_add(other.instructions_executed);
        self.slices = self.slices.wrapping_add(other.slices);
        self.preemptions = self.preemptions.wrapping_add(other.preemptions);
        self.completions = self.completions.wrapping_add(other.completions);
        self.alloc_failures = self.alloc_failures.wrapping_add(other.alloc_failures);
        self.pause_waits = self.pause_waits.wrapping_add(other.pause_waits);
        self.interrupted = self.interrupted.wrapping_add(other.interrupted);
        self.slice_len.merge(&other.slice_len);
        self.worker_count = self.worker_count.wrapping_add(other.worker_count);
    }

    /// Fraction of slices that ended in preemption.
    pub fn preemption_rate(&self) -> f64 {
        if self.slices == 0 {
            0.0
        } else {
            self.preemptions as f64 / self.slices as f64
        }
    }
}
