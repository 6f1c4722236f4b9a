//! Canned request programs.
//!
//! Each scenario drives a fresh debugger through one pattern of use or
//! misuse. Scenarios never release blocks they mean to leak; the runner
//! collects the leak report before the debugger is dropped.

use std::ptr;

use heapcheck_membrane::{CappedAllocator, LibcAllocator, MemoryDebugger, site};

/// Largest single raw block the harness allocator hands out.
pub const HEAP_CAP: usize = 1 << 28;

pub type HarnessDebugger = MemoryDebugger<CappedAllocator<LibcAllocator>>;

/// A named request program.
pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    body: fn(&HarnessDebugger),
}

impl Scenario {
    pub fn run(&self, dbg: &HarnessDebugger) {
        (self.body)(dbg);
    }
}

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "basic",
        summary: "allocate 16, free it, allocate 32 and keep it",
        body: basic,
    },
    Scenario {
        name: "reuse",
        summary: "many allocate/free pairs of varying size",
        body: reuse,
    },
    Scenario {
        name: "double-free",
        summary: "free the same block twice",
        body: double_free,
    },
    Scenario {
        name: "wild-free",
        summary: "free a pointer to a stack variable",
        body: wild_free,
    },
    Scenario {
        name: "interior-free",
        summary: "free a pointer into the middle of a live block",
        body: interior_free,
    },
    Scenario {
        name: "realloc-grow",
        summary: "grow a block and check its contents survive",
        body: realloc_grow,
    },
    Scenario {
        name: "realloc-shrink",
        summary: "shrink a block, then realloc to zero",
        body: realloc_shrink,
    },
    Scenario {
        name: "calloc-overflow",
        summary: "zero-allocate with an overflowing element count",
        body: calloc_overflow,
    },
    Scenario {
        name: "huge-failure",
        summary: "requests the allocator refuses or that overflow the block size",
        body: huge_failure,
    },
    Scenario {
        name: "leaks",
        summary: "allocate five blocks, free every other one",
        body: leaks,
    },
    Scenario {
        name: "wild-write",
        summary: "write one byte past the end of a block, then free it",
        body: wild_write,
    },
];

/// Look up a scenario by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

fn basic(dbg: &HarnessDebugger) {
    if let Some(p) = dbg.allocate(16, site!()) {
        dbg.free(p.as_ptr(), site!());
    }
    let _ = dbg.allocate(32, site!());
}

fn reuse(dbg: &HarnessDebugger) {
    for i in 0..100 {
        let size = 1 + (i * 37) % 250;
        if let Some(p) = dbg.allocate(size, site!()) {
            dbg.free(p.as_ptr(), site!());
        }
    }
}

fn double_free(dbg: &HarnessDebugger) {
    if let Some(p) = dbg.allocate(64, site!()) {
        dbg.free(p.as_ptr(), site!());
        dbg.free(p.as_ptr(), site!());
    }
}

fn wild_free(dbg: &HarnessDebugger) {
    let keep = dbg.allocate(8, site!());
    let mut local = 0u64;
    dbg.free((&raw mut local).cast::<u8>(), site!());
    if let Some(p) = keep {
        dbg.free(p.as_ptr(), site!());
    }
}

fn interior_free(dbg: &HarnessDebugger) {
    if let Some(p) = dbg.allocate(2001, site!()) {
        dbg.free(p.as_ptr().wrapping_add(128), site!());
        dbg.free(p.as_ptr(), site!());
    }
}

fn realloc_grow(dbg: &HarnessDebugger) {
    let text = b"membrane";
    let Some(p) = dbg.allocate(text.len(), site!()) else {
        return;
    };
    // SAFETY: p is live for text.len() bytes.
    unsafe { ptr::copy_nonoverlapping(text.as_ptr(), p.as_ptr(), text.len()) };
    let Some(q) = dbg.reallocate(p.as_ptr(), 4 * text.len(), site!()) else {
        return;
    };
    // SAFETY: q is live for at least text.len() bytes.
    let kept = unsafe { std::slice::from_raw_parts(q.as_ptr(), text.len()) };
    assert_eq!(kept, text, "reallocate lost the original contents");
    dbg.free(q.as_ptr(), site!());
}

fn realloc_shrink(dbg: &HarnessDebugger) {
    let Some(p) = dbg.zero_allocate(64, 4, site!()) else {
        return;
    };
    if let Some(q) = dbg.reallocate(p.as_ptr(), 16, site!()) {
        let _ = dbg.reallocate(q.as_ptr(), 0, site!());
    }
}

fn calloc_overflow(dbg: &HarnessDebugger) {
    let count = usize::MAX / 8 + 1;
    let p = dbg.zero_allocate(count, 16, site!());
    assert!(p.is_none(), "overflowing zero_allocate returned memory");
}

fn huge_failure(dbg: &HarnessDebugger) {
    assert!(dbg.allocate(HEAP_CAP + 1, site!()).is_none());
    assert!(dbg.allocate(usize::MAX - 1, site!()).is_none());
    if let Some(p) = dbg.allocate(100, site!()) {
        dbg.free(p.as_ptr(), site!());
    }
}

fn leaks(dbg: &HarnessDebugger) {
    let blocks: Vec<_> = (1..=5)
        .filter_map(|i| dbg.allocate(i * 10, site!()))
        .collect();
    for p in blocks.iter().step_by(2) {
        dbg.free(p.as_ptr(), site!());
    }
}

fn wild_write(dbg: &HarnessDebugger) {
    if let Some(p) = dbg.allocate(8, site!()) {
        // SAFETY: the byte after the payload is the first byte of the
        // block's guard word, still inside the raw allocation.
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0x41, 8);
            *p.as_ptr().add(8) ^= 0xFF;
        }
        dbg.free(p.as_ptr(), site!());
    }
}
