//! Call sites, failure and bug taxonomy, and the bug tally.
//!
//! Allocation failures are counted in the statistics and the request returns
//! `None`. Invalid frees and wild writes are reported as [`MemoryBug`]s whose
//! `Display` is the diagnostic line printed to the configured target. Neither
//! kind unwinds the caller.

use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

/// Source location of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Site {
    pub file: &'static str,
    pub line: u32,
}

impl Site {
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of whoever called the function this is invoked from.
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Why an allocation request produced no pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocFailure {
    #[error("block for a {requested} byte payload does not fit in usize")]
    SizeOverflow { requested: usize },
    #[error("{count} elements of {elem_size} bytes do not fit in usize")]
    CountOverflow { count: usize, elem_size: usize },
    #[error("underlying allocator refused {block_size} bytes for a {requested} byte payload")]
    Exhausted { requested: usize, block_size: usize },
}

impl AllocFailure {
    /// Bytes charged to the failure counters.
    #[must_use]
    pub fn requested_bytes(&self) -> usize {
        match *self {
            Self::SizeOverflow { requested } | Self::Exhausted { requested, .. } => requested,
            Self::CountOverflow { count, elem_size } => count.saturating_mul(elem_size),
        }
    }
}

/// Live block that encloses an interior pointer passed to `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Enclosing {
    /// Bytes from the block's payload start to the freed pointer.
    pub offset: usize,
    /// Payload size of the enclosing block.
    pub size: usize,
    /// Where the enclosing block was allocated.
    pub site: Site,
}

/// Detected allocator misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryBug {
    #[error("MEMORY BUG {site}: invalid free of pointer {ptr:#x}, not in heap")]
    NotInHeap { site: Site, ptr: usize },
    #[error(
        "MEMORY BUG {site}: invalid free of pointer {ptr:#x}, not allocated{}",
        enclosing_note(.ptr, .inside)
    )]
    NotAllocated {
        site: Site,
        ptr: usize,
        inside: Option<Enclosing>,
    },
    #[error("MEMORY BUG {site}: detected wild write during free of pointer {ptr:#x}")]
    WildWrite { site: Site, ptr: usize },
}

fn enclosing_note(ptr: &usize, inside: &Option<Enclosing>) -> String {
    match inside {
        Some(e) => format!(
            "\n  {}: {ptr:#x} is {} bytes inside a {} byte region allocated here",
            e.site, e.offset, e.size
        ),
        None => String::new(),
    }
}

/// Bug classification without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BugKind {
    NotInHeap,
    NotAllocated,
    WildWrite,
}

impl BugKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInHeap => "not_in_heap",
            Self::NotAllocated => "not_allocated",
            Self::WildWrite => "wild_write",
        }
    }
}

impl MemoryBug {
    #[must_use]
    pub const fn kind(&self) -> BugKind {
        match self {
            Self::NotInHeap { .. } => BugKind::NotInHeap,
            Self::NotAllocated { .. } => BugKind::NotAllocated,
            Self::WildWrite { .. } => BugKind::WildWrite,
        }
    }

    #[must_use]
    pub const fn site(&self) -> Site {
        match *self {
            Self::NotInHeap { site, .. }
            | Self::NotAllocated { site, .. }
            | Self::WildWrite { site, .. } => site,
        }
    }

    #[must_use]
    pub const fn ptr(&self) -> usize {
        match *self {
            Self::NotInHeap { ptr, .. }
            | Self::NotAllocated { ptr, .. }
            | Self::WildWrite { ptr, .. } => ptr,
        }
    }
}

/// Counters of reported bugs, kept apart from the allocation statistics.
pub struct BugTally {
    pub total: AtomicU64,
    pub not_in_heap: AtomicU64,
    pub not_allocated: AtomicU64,
    pub wild_writes: AtomicU64,
}

impl BugTally {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            not_in_heap: AtomicU64::new(0),
            not_allocated: AtomicU64::new(0),
            wild_writes: AtomicU64::new(0),
        }
    }

    pub fn record(&self, bug: &MemoryBug) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match bug.kind() {
            BugKind::NotInHeap => &self.not_in_heap,
            BugKind::NotAllocated => &self.not_allocated,
            BugKind::WildWrite => &self.wild_writes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> BugTallySnapshot {
        BugTallySnapshot {
            total: self.total.load(Ordering::Relaxed),
            not_in_heap: self.not_in_heap.load(Ordering::Relaxed),
            not_allocated: self.not_allocated.load(Ordering::Relaxed),
            wild_writes: self.wild_writes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.not_in_heap,
            &self.not_allocated,
            &self.wild_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for BugTally {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a [`BugTally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BugTallySnapshot {
    pub total: u64,
    pub not_in_heap: u64,
    pub not_allocated: u64,
    pub wild_writes: u64,
}
