//! Allocation statistics and heap bounds.
//!
//! The aggregator is plain data; the debugger keeps it behind the same lock
//! as the registry so a snapshot always reflects one instant.

use std::fmt;

use serde::Serialize;

/// Lowest payload address ever handed out and highest payload end ever
/// covered. Both only move outward; frees never shrink them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapBounds {
    min: usize,
    max: usize,
}

impl HeapBounds {
    /// True until the first successful allocation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min == 0 && self.max == 0
    }

    /// Widen the bounds to cover `[start, end]`.
    pub fn extend(&mut self, start: usize, end: usize) {
        if self.is_empty() {
            self.min = start;
            self.max = end;
            return;
        }
        self.min = self.min.min(start);
        self.max = self.max.max(end);
    }

    /// Inclusive containment; an empty range contains nothing.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        !self.is_empty() && (self.min..=self.max).contains(&addr)
    }

    #[must_use]
    pub fn min(&self) -> usize {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }
}

/// Running counters for one debugger.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    alloc_count: u64,
    alloc_bytes: u64,
    free_count: u64,
    free_bytes: u64,
    fail_count: u64,
    fail_bytes: u64,
    heap: HeapBounds,
}

impl StatsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful allocation of `size` bytes at payload `ptr`.
    pub fn record_allocation_success(&mut self, ptr: usize, size: usize) {
        self.alloc_count += 1;
        self.alloc_bytes = self.alloc_bytes.saturating_add(size as u64);
        self.heap.extend(ptr, ptr + size);
    }

    /// Count a failed request. Byte totals saturate rather than wrap.
    pub fn record_allocation_failure(&mut self, size: usize) {
        self.fail_count += 1;
        self.fail_bytes = self.fail_bytes.saturating_add(size as u64);
    }

    pub fn record_free(&mut self, size: usize) {
        self.free_count += 1;
        self.free_bytes = self.free_bytes.saturating_add(size as u64);
    }

    #[must_use]
    pub fn heap(&self) -> HeapBounds {
        self.heap
    }

    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        debug_assert!(self.free_count <= self.alloc_count);
        debug_assert!(self.free_bytes <= self.alloc_bytes);
        StatisticsSnapshot {
            active_count: self.alloc_count - self.free_count,
            active_bytes: self.alloc_bytes - self.free_bytes,
            total_count: self.alloc_count,
            total_bytes: self.alloc_bytes,
            free_count: self.free_count,
            free_bytes: self.free_bytes,
            fail_count: self.fail_count,
            fail_bytes: self.fail_bytes,
            heap_min: self.heap.min(),
            heap_max: self.heap.max(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Point-in-time copy of the statistics.
///
/// `heap_min`/`heap_max` are zero until something has been allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub active_count: u64,
    pub active_bytes: u64,
    pub total_count: u64,
    pub total_bytes: u64,
    pub free_count: u64,
    pub free_bytes: u64,
    pub fail_count: u64,
    pub fail_bytes: u64,
    pub heap_min: usize,
    pub heap_max: usize,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "malloc count: active {:>10}   total {:>10}   fail {:>10}",
            self.active_count, self.total_count, self.fail_count
        )?;
        writeln!(
            f,
            "malloc size:  active {:>10}   total {:>10}   fail {:>10}",
            self.active_bytes, self.total_bytes, self.fail_bytes
        )
    }
}
