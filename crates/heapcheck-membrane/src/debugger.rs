//! Request API: allocate, free, reallocate, zero-allocate, statistics, and
//! leak reporting.
//!
//! A [`MemoryDebugger`] owns all state for one heap: the statistics, the
//! live-block registry, the generation counter, and the optional event log.
//! They sit behind a single `parking_lot::Mutex`, so every request is atomic
//! with respect to every other and a statistics snapshot reflects one
//! instant. The bug tally is separate because it never needs to agree with
//! the statistics.
//!
//! Misuse never unwinds the caller. Failed allocations return `None` and are
//! counted; invalid frees print a diagnostic and leave the underlying
//! allocator untouched.

use std::io::{self, Write};
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::config::{DebugConfig, DiagnosticTarget, global_config};
use crate::diagnostics::{AllocFailure, BugKind, BugTally, BugTallySnapshot, MemoryBug, Site};
use crate::header;
use crate::log::{LogEmitter, LogEntry, LogEvent};
use crate::raw::{LibcAllocator, RawAllocator};
use crate::registry::{BlockRegistry, LiveBlock};
use crate::stats::{StatisticsSnapshot, StatsAggregator};

/// Outcome of a `free` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeResult {
    /// Block released and counted.
    Freed,
    /// Null pointer; nothing to do.
    NullIgnored,
    /// Block released and counted, but its header or guard was overwritten.
    FreedWithWildWrite,
    /// Pointer outside the heap bounds; ignored.
    NotInHeap,
    /// Pointer inside the heap bounds but not live (wild or double free);
    /// ignored.
    NotAllocated,
}

impl FreeResult {
    /// True when the request was misuse.
    #[must_use]
    pub const fn is_bug(self) -> bool {
        matches!(
            self,
            Self::FreedWithWildWrite | Self::NotInHeap | Self::NotAllocated
        )
    }
}

struct DebuggerState {
    stats: StatsAggregator,
    registry: BlockRegistry,
    next_generation: u32,
    log: Option<LogEmitter>,
}

impl DebuggerState {
    fn new(log: Option<LogEmitter>) -> Self {
        Self {
            stats: StatsAggregator::new(),
            registry: BlockRegistry::new(),
            next_generation: 1,
            log,
        }
    }

    fn take_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        generation
    }

    fn log(&mut self, entry: LogEntry) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.emit(entry);
        }
    }
}

/// Debugging layer in front of a [`RawAllocator`].
pub struct MemoryDebugger<A: RawAllocator = LibcAllocator> {
    allocator: A,
    state: Mutex<DebuggerState>,
    bugs: BugTally,
    diagnostics: DiagnosticTarget,
}

impl MemoryDebugger<LibcAllocator> {
    /// Debugger over the C library allocator, configured from the
    /// environment.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(LibcAllocator)
    }
}

impl Default for MemoryDebugger<LibcAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator> MemoryDebugger<A> {
    /// Debugger over `allocator`, configured from the environment.
    #[must_use]
    pub fn with_allocator(allocator: A) -> Self {
        Self::with_config(allocator, global_config())
    }

    /// Debugger over `allocator` with explicit configuration.
    ///
    /// If the event log file cannot be created a warning is printed and the
    /// debugger runs without a log.
    #[must_use]
    pub fn with_config(allocator: A, config: &DebugConfig) -> Self {
        let log = config
            .event_log
            .as_deref()
            .and_then(|path| match LogEmitter::to_file(path) {
                Ok(emitter) => Some(emitter),
                Err(err) => {
                    eprintln!("heapcheck: cannot open event log {}: {err}", path.display());
                    None
                }
            });
        Self {
            allocator,
            state: Mutex::new(DebuggerState::new(log)),
            bugs: BugTally::new(),
            diagnostics: config.diagnostics,
        }
    }

    /// Replace the event log.
    #[must_use]
    pub fn with_log(self, emitter: LogEmitter) -> Self {
        self.state.lock().log = Some(emitter);
        self
    }

    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Allocate `size` bytes of uninitialized memory.
    ///
    /// `size == 0` returns `None` without touching anything.
    pub fn allocate(&self, size: usize, site: Site) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        self.allocate_locked(&mut state, size, site)
    }

    /// Release a block returned by this debugger.
    ///
    /// `ptr` may be anything: null is ignored, and pointers the registry does
    /// not know are reported and never passed to the underlying allocator.
    pub fn free(&self, ptr: *mut u8, site: Site) -> FreeResult {
        let mut state = self.state.lock();
        self.free_locked(&mut state, ptr, site)
    }

    /// Resize a block by allocating, copying, and freeing.
    ///
    /// - null `ptr` behaves as `allocate(new_size)`.
    /// - `new_size == 0` behaves as `free(ptr)` and returns `None`.
    /// - if the new allocation fails, `ptr` stays live and untouched.
    ///
    /// The copy length comes from the registry. A pointer that is not live
    /// is reported as a bad free and contributes no bytes.
    pub fn reallocate(&self, ptr: *mut u8, new_size: usize, site: Site) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if ptr.is_null() {
            return self.allocate_locked(&mut state, new_size, site);
        }
        if new_size == 0 {
            self.free_locked(&mut state, ptr, site);
            return None;
        }

        let Some(old_size) = state.registry.get(ptr as usize).map(|block| block.size) else {
            // Report before allocating: the raw allocator may hand the dead
            // address straight back.
            self.free_locked(&mut state, ptr, site);
            return self.allocate_locked(&mut state, new_size, site);
        };
        let new_ptr = self.allocate_locked(&mut state, new_size, site)?;
        // SAFETY: the registry vouches that `ptr` is live for `old_size`
        // bytes; `new_ptr` is a distinct fresh block of `new_size` bytes.
        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), old_size.min(new_size));
        }
        self.free_locked(&mut state, ptr, site);
        Some(new_ptr)
    }

    /// Allocate zeroed memory for `count` elements of `elem_size` bytes.
    ///
    /// An overflowing product is counted as a failure without calling the
    /// allocator.
    pub fn zero_allocate(&self, count: usize, elem_size: usize, site: Site) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        let Some(total) = count.checked_mul(elem_size) else {
            Self::record_failure(&mut state, AllocFailure::CountOverflow { count, elem_size }, site);
            return None;
        };
        let payload = self.allocate_locked(&mut state, total, site)?;
        // SAFETY: payload is a fresh block of `total` bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        Some(payload)
    }

    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.state.lock().stats.snapshot()
    }

    #[must_use]
    pub fn bug_tally(&self) -> BugTallySnapshot {
        self.bugs.snapshot()
    }

    /// Live blocks in allocation order.
    #[must_use]
    pub fn live_blocks(&self) -> Vec<LiveBlock> {
        self.state.lock().registry.enumerate()
    }

    pub fn write_statistics(&self, out: &mut impl Write) -> io::Result<()> {
        write!(out, "{}", self.statistics())
    }

    pub fn print_statistics(&self) {
        let _ = self.write_statistics(&mut io::stdout().lock());
    }

    /// One `LEAK CHECK` line per live block, in allocation order.
    pub fn write_leak_report(&self, out: &mut impl Write) -> io::Result<()> {
        let mut state = self.state.lock();
        for block in state.registry.enumerate() {
            writeln!(
                out,
                "LEAK CHECK: {}: allocated object {:#x} with size {}",
                block.site, block.ptr, block.size
            )?;
            state.log(
                LogEntry::new(LogEvent::Leak)
                    .with_site(block.site)
                    .with_ptr(block.ptr)
                    .with_size(block.size),
            );
        }
        Ok(())
    }

    pub fn print_leak_report(&self) {
        let _ = self.write_leak_report(&mut io::stdout().lock());
    }

    /// Release every live block and zero all counters.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.release_all(&mut state);
        state.stats.reset();
        state.next_generation = 1;
        state.log(LogEntry::new(LogEvent::Reset));
        self.bugs.reset();
    }

    fn allocate_locked(
        &self,
        state: &mut DebuggerState,
        size: usize,
        site: Site,
    ) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let block = match self.acquire_block(size) {
            Ok(block) => block,
            Err(failure) => {
                Self::record_failure(state, failure, site);
                return None;
            }
        };

        let generation = state.take_generation();
        // SAFETY: `block` spans compute_block_size(size) bytes.
        let payload = unsafe { header::write_header(block, size, generation) };
        let addr = payload.as_ptr() as usize;
        state.stats.record_allocation_success(addr, size);
        state.registry.insert(LiveBlock {
            ptr: addr,
            size,
            site,
            generation,
        });
        state.log(
            LogEntry::new(LogEvent::Alloc)
                .with_site(site)
                .with_ptr(addr)
                .with_size(size),
        );
        Some(payload)
    }

    fn acquire_block(&self, size: usize) -> Result<NonNull<u8>, AllocFailure> {
        let block_size = header::compute_block_size(size)?;
        self.allocator
            .raw_allocate(block_size)
            .ok_or(AllocFailure::Exhausted {
                requested: size,
                block_size,
            })
    }

    fn record_failure(state: &mut DebuggerState, failure: AllocFailure, site: Site) {
        let bytes = failure.requested_bytes();
        state.stats.record_allocation_failure(bytes);
        state.log(
            LogEntry::new(LogEvent::AllocFail)
                .with_site(site)
                .with_size(bytes)
                .with_detail(failure.to_string()),
        );
    }

    fn free_locked(&self, state: &mut DebuggerState, ptr: *mut u8, site: Site) -> FreeResult {
        let Some(payload) = NonNull::new(ptr) else {
            return FreeResult::NullIgnored;
        };
        let addr = payload.as_ptr() as usize;

        let in_heap = state.stats.heap().contains(addr);
        if !in_heap {
            self.report(state, MemoryBug::NotInHeap { site, ptr: addr });
        }

        let Some(block) = state.registry.remove(addr) else {
            let inside = state.registry.find_enclosing(addr);
            self.report(
                state,
                MemoryBug::NotAllocated {
                    site,
                    ptr: addr,
                    inside,
                },
            );
            return if in_heap {
                FreeResult::NotAllocated
            } else {
                FreeResult::NotInHeap
            };
        };

        // SAFETY: the registry vouches that `payload` is a live block written
        // by write_header with this size and generation.
        let intact = unsafe { header::verify(payload, block.size, block.generation) };
        // SAFETY: the block was just removed from the registry, so it is
        // released exactly once.
        unsafe { self.allocator.raw_release(header::block_start(payload)) };
        state.stats.record_free(block.size);
        state.log(
            LogEntry::new(LogEvent::Free)
                .with_site(site)
                .with_ptr(addr)
                .with_size(block.size),
        );

        if intact {
            FreeResult::Freed
        } else {
            self.report(state, MemoryBug::WildWrite { site, ptr: addr });
            FreeResult::FreedWithWildWrite
        }
    }

    fn report(&self, state: &mut DebuggerState, bug: MemoryBug) {
        self.bugs.record(&bug);
        match self.diagnostics {
            DiagnosticTarget::Stderr => eprintln!("{bug}"),
            DiagnosticTarget::Stdout => println!("{bug}"),
            DiagnosticTarget::Silent => {}
        }
        let event = match bug.kind() {
            BugKind::WildWrite => LogEvent::WildWrite,
            BugKind::NotInHeap | BugKind::NotAllocated => LogEvent::InvalidFree,
        };
        state.log(
            LogEntry::new(event)
                .with_site(bug.site())
                .with_ptr(bug.ptr())
                .with_detail(bug.to_string()),
        );
    }

    fn release_all(&self, state: &mut DebuggerState) {
        for block in state.registry.drain() {
            if let Some(payload) = NonNull::new(block.ptr as *mut u8) {
                // SAFETY: every drained entry was a live block from this
                // allocator and is now out of the registry.
                unsafe { self.allocator.raw_release(header::block_start(payload)) };
            }
        }
    }
}

impl<A: RawAllocator> Drop for MemoryDebugger<A> {
    /// Blocks still live when the debugger drops are released.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for block in state.registry.drain() {
            if let Some(payload) = NonNull::new(block.ptr as *mut u8) {
                // SAFETY: as in release_all.
                unsafe { self.allocator.raw_release(header::block_start(payload)) };
            }
        }
    }
}

static GLOBAL_DEBUGGER: OnceLock<MemoryDebugger> = OnceLock::new();

/// Process-wide debugger over the C library allocator.
#[must_use]
pub fn global_debugger() -> &'static MemoryDebugger {
    GLOBAL_DEBUGGER.get_or_init(MemoryDebugger::new)
}
