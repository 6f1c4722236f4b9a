//! Debugging membrane for heap allocation requests.
//!
//! Every `malloc`/`free`/`realloc`/`calloc`-style request from application
//! code passes through this crate before it reaches the underlying allocator.
//! The membrane attaches a header to each block, keeps a registry of live
//! blocks, aggregates statistics, and classifies allocator misuse.
//!
//! # Architecture
//!
//! - **Header codec** (`header`): fixed block header plus trailing guard word
//! - **Statistics** (`stats`): allocation/free/failure counters and heap bounds
//! - **Registry** (`registry`): live payload pointers keyed by address
//! - **Raw allocator** (`raw`): the opaque allocator the membrane delegates to
//! - **Diagnostics** (`diagnostics`): bug taxonomy, call sites, bug tally
//! - **Configuration** (`config`): diagnostic target and event log path
//! - **Event log** (`log`): JSONL structured log of every request
//! - **Debugger** (`debugger`): the request API tying it all together

pub mod config;
pub mod debugger;
pub mod diagnostics;
pub mod header;
pub mod log;
pub mod raw;
pub mod registry;
pub mod stats;

pub use config::{DebugConfig, DiagnosticTarget};
pub use debugger::{FreeResult, MemoryDebugger, global_debugger};
pub use diagnostics::{AllocFailure, BugKind, BugTally, BugTallySnapshot, MemoryBug, Site};
pub use raw::{CappedAllocator, LibcAllocator, RawAllocator};
pub use stats::StatisticsSnapshot;

/// Capture the current source location as a [`Site`].
#[macro_export]
macro_rules! site {
    () => {
        $crate::Site::new(file!(), line!())
    };
}
