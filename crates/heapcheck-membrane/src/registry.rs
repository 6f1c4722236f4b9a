//! Active-block registry.
//!
//! The registry is the only authority on whether a payload pointer is live.
//! Entries are keyed by payload address; header bytes are never consulted to
//! make that decision.

use std::collections::HashMap;

use crate::diagnostics::{Enclosing, Site};

/// Metadata for one live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveBlock {
    /// Payload address handed to the caller.
    pub ptr: usize,
    /// Payload size the caller requested.
    pub size: usize,
    /// Where the block was allocated.
    pub site: Site,
    /// Allocation order, unique per debugger.
    pub generation: u32,
}

impl LiveBlock {
    /// Returns true if `addr` lies inside `[ptr, ptr + size)`.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let end = self.ptr.saturating_add(self.size);
        (self.ptr..end).contains(&addr)
    }
}

/// Live payload pointers and their recorded sizes.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    live: HashMap<usize, LiveBlock>,
    live_bytes: usize,
}

impl BlockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh block. The address must not already be live.
    pub fn insert(&mut self, block: LiveBlock) {
        let previous = self.live.insert(block.ptr, block);
        debug_assert!(previous.is_none(), "address {:#x} handed out twice", block.ptr);
        self.live_bytes += block.size;
    }

    /// Remove a live block, returning its metadata, or `None` if `ptr` is not
    /// live.
    pub fn remove(&mut self, ptr: usize) -> Option<LiveBlock> {
        let block = self.live.remove(&ptr)?;
        self.live_bytes -= block.size;
        Some(block)
    }

    #[must_use]
    pub fn get(&self, ptr: usize) -> Option<&LiveBlock> {
        self.live.get(&ptr)
    }

    /// Find the live block whose payload contains `addr`.
    ///
    /// Linear in the number of live blocks; only used to explain a bad free.
    #[must_use]
    pub fn find_enclosing(&self, addr: usize) -> Option<Enclosing> {
        self.live
            .values()
            .find(|block| block.contains(addr))
            .map(|block| Enclosing {
                offset: addr - block.ptr,
                size: block.size,
                site: block.site,
            })
    }

    /// All live blocks in allocation order.
    #[must_use]
    pub fn enumerate(&self) -> Vec<LiveBlock> {
        let mut blocks: Vec<LiveBlock> = self.live.values().copied().collect();
        blocks.sort_by_key(|block| block.generation);
        blocks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[must_use]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Remove every entry, handing them back in allocation order.
    pub fn drain(&mut self) -> Vec<LiveBlock> {
        let blocks = self.enumerate();
        self.live.clear();
        self.live_bytes = 0;
        blocks
    }
}
