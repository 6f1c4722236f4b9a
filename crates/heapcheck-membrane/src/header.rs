//! Block header codec and trailing guard word.
//!
//! Every block the membrane obtains from the raw allocator is laid out as:
//!
//! ```text
//! block   ─▶ +----------------+
//!            | BlockHeader    |  HEADER_SIZE bytes
//! payload ─▶ +----------------+
//!            | payload        |  header.size bytes
//!            +----------------+
//!            | guard word     |  GUARD_SIZE bytes
//!            +----------------+
//! ```
//!
//! Every boundary is a byte offset derived from `HEADER_SIZE`, which is
//! `size_of::<BlockHeader>()`. Field positions inside the header come from
//! `offset_of!`, so writing and reading always agree on one layout.
//!
//! The header is never trusted to decide whether a pointer is live; the
//! registry does that. Header bytes are only read back from pointers the
//! registry has already vouched for, to detect wild writes.

use std::mem::{self, offset_of};
use std::ptr::{self, NonNull};

use crate::diagnostics::AllocFailure;

/// Size of the header that precedes every payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Size of the guard word that follows every payload.
pub const GUARD_SIZE: usize = mem::size_of::<u64>();

/// Bytes added to every request (header + guard).
pub const BLOCK_OVERHEAD: usize = HEADER_SIZE + GUARD_SIZE;

/// Alignment of every payload pointer, given a 16-byte aligned raw block.
pub const PAYLOAD_ALIGN: usize = 16;

const HEADER_MAGIC: u32 = 0x4850_4331;
const GUARD_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

const _: () = assert!(HEADER_SIZE % PAYLOAD_ALIGN == 0);

/// Metadata record stored immediately before a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BlockHeader {
    /// Payload size the caller requested.
    pub size: u64,
    /// Allocation generation, also mixed into the guard word.
    pub generation: u32,
    /// Constant marker; anything else means the header was overwritten.
    pub magic: u32,
}

impl BlockHeader {
    #[must_use]
    pub fn new(size: usize, generation: u32) -> Self {
        Self {
            size: size as u64,
            generation,
            magic: HEADER_MAGIC,
        }
    }

    /// Serialize to little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        put(&mut buf, offset_of!(BlockHeader, size), &self.size.to_le_bytes());
        put(
            &mut buf,
            offset_of!(BlockHeader, generation),
            &self.generation.to_le_bytes(),
        );
        put(&mut buf, offset_of!(BlockHeader, magic), &self.magic.to_le_bytes());
        buf
    }

    /// Deserialize from little-endian bytes.
    #[must_use]
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            size: u64::from_le_bytes(take(buf, offset_of!(BlockHeader, size))),
            generation: u32::from_le_bytes(take(buf, offset_of!(BlockHeader, generation))),
            magic: u32::from_le_bytes(take(buf, offset_of!(BlockHeader, magic))),
        }
    }

    #[must_use]
    pub fn has_magic(&self) -> bool {
        self.magic == HEADER_MAGIC
    }
}

fn put(buf: &mut [u8; HEADER_SIZE], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn take<const N: usize>(buf: &[u8; HEADER_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// Size of the raw block needed to carry `payload_size` bytes.
///
/// Fails with [`AllocFailure::SizeOverflow`] when the sum does not fit in
/// `usize`.
pub fn compute_block_size(payload_size: usize) -> Result<usize, AllocFailure> {
    payload_size
        .checked_add(BLOCK_OVERHEAD)
        .ok_or(AllocFailure::SizeOverflow {
            requested: payload_size,
        })
}

/// Write the header and guard word into a fresh block and return the payload
/// pointer.
///
/// # Safety
///
/// `block` must be valid for writes of `compute_block_size(size)` bytes.
pub unsafe fn write_header(block: NonNull<u8>, size: usize, generation: u32) -> NonNull<u8> {
    let bytes = BlockHeader::new(size, generation).to_bytes();
    // SAFETY: the first HEADER_SIZE bytes of the block belong to the header.
    let payload = unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), HEADER_SIZE);
        block.add(HEADER_SIZE)
    };
    let guard = guard_word(payload.as_ptr() as usize, size, generation).to_le_bytes();
    // SAFETY: the guard sits right after the payload, inside the block.
    unsafe {
        ptr::copy_nonoverlapping(guard.as_ptr(), payload.as_ptr().add(size), GUARD_SIZE);
    }
    payload
}

/// Read the header that precedes `payload`.
///
/// # Safety
///
/// `payload` must have been produced by [`write_header`] and its block must
/// not have been released.
#[must_use]
pub unsafe fn read_header(payload: NonNull<u8>) -> BlockHeader {
    let mut buf = [0u8; HEADER_SIZE];
    // SAFETY: caller guarantees HEADER_SIZE readable bytes before payload.
    unsafe {
        ptr::copy_nonoverlapping(
            block_start(payload).as_ptr(),
            buf.as_mut_ptr(),
            HEADER_SIZE,
        );
    }
    BlockHeader::from_bytes(&buf)
}

/// Recover the raw block pointer from a payload pointer.
///
/// # Safety
///
/// `payload` must have been produced by [`write_header`].
#[must_use]
pub unsafe fn block_start(payload: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: write_header placed payload exactly HEADER_SIZE bytes in.
    unsafe { payload.sub(HEADER_SIZE) }
}

/// Check that the header and guard of a live block still hold the values
/// written at allocation time.
///
/// # Safety
///
/// `payload` must be a live block produced by [`write_header`] with payload
/// size `size`.
#[must_use]
pub unsafe fn verify(payload: NonNull<u8>, size: usize, generation: u32) -> bool {
    // SAFETY: forwarded from the caller.
    let header = unsafe { read_header(payload) };
    if !header.has_magic() || header.size != size as u64 || header.generation != generation {
        return false;
    }
    let mut guard = [0u8; GUARD_SIZE];
    // SAFETY: GUARD_SIZE bytes follow the payload inside the block.
    unsafe {
        ptr::copy_nonoverlapping(payload.as_ptr().add(size), guard.as_mut_ptr(), GUARD_SIZE);
    }
    u64::from_le_bytes(guard) == guard_word(payload.as_ptr() as usize, size, generation)
}

fn guard_word(payload_addr: usize, size: usize, generation: u32) -> u64 {
    // splitmix64 finalizer over the block identity
    let mut z = (payload_addr as u64)
        ^ (size as u64).rotate_left(29)
        ^ (u64::from(generation) << 7)
        ^ GUARD_SEED;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_for(size: usize) -> Vec<u8> {
        vec![0u8; compute_block_size(size).unwrap()]
    }

    #[test]
    fn header_size_matches_struct() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(BLOCK_OVERHEAD, HEADER_SIZE + GUARD_SIZE);
    }

    #[test]
    fn header_bytes_roundtrip() {
        let header = BlockHeader::new(4096, 7);
        assert_eq!(BlockHeader::from_bytes(&header.to_bytes()), header);
        assert!(header.has_magic());
    }

    #[test]
    fn block_size_overflow_is_reported() {
        assert_eq!(compute_block_size(16), Ok(16 + BLOCK_OVERHEAD));
        assert_eq!(
            compute_block_size(usize::MAX - BLOCK_OVERHEAD + 1),
            Err(AllocFailure::SizeOverflow {
                requested: usize::MAX - BLOCK_OVERHEAD + 1
            })
        );
        assert!(compute_block_size(usize::MAX - BLOCK_OVERHEAD).is_ok());
    }

    #[test]
    fn write_then_read_uses_same_offset() {
        let mut buf = block_for(40);
        let block = NonNull::new(buf.as_mut_ptr()).unwrap();
        // SAFETY: buf is exactly one block for a 40 byte payload.
        let payload = unsafe { write_header(block, 40, 3) };
        assert_eq!(payload.as_ptr() as usize - block.as_ptr() as usize, HEADER_SIZE);

        // SAFETY: payload came from write_header on a live buffer.
        let header = unsafe { read_header(payload) };
        assert_eq!(header.size, 40);
        assert_eq!(header.generation, 3);
        // SAFETY: same as above.
        assert_eq!(unsafe { block_start(payload) }, block);
    }

    #[test]
    fn verify_accepts_untouched_block() {
        let mut buf = block_for(24);
        let block = NonNull::new(buf.as_mut_ptr()).unwrap();
        // SAFETY: buf is one block for a 24 byte payload.
        let payload = unsafe { write_header(block, 24, 1) };
        // SAFETY: payload is live for 24 bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0xAB, 24) };
        // SAFETY: payload is live.
        assert!(unsafe { verify(payload, 24, 1) });
    }

    #[test]
    fn verify_catches_overrun_into_guard() {
        let mut buf = block_for(24);
        let block = NonNull::new(buf.as_mut_ptr()).unwrap();
        // SAFETY: buf is one block for a 24 byte payload.
        let payload = unsafe { write_header(block, 24, 1) };
        // SAFETY: the guard's first byte is inside buf.
        unsafe { *payload.as_ptr().add(24) ^= 0xFF };
        // SAFETY: payload is still inside buf.
        assert!(!unsafe { verify(payload, 24, 1) });
    }

    #[test]
    fn verify_catches_underrun_into_header() {
        let mut buf = block_for(8);
        let block = NonNull::new(buf.as_mut_ptr()).unwrap();
        // SAFETY: buf is one block for an 8 byte payload.
        let payload = unsafe { write_header(block, 8, 9) };
        // SAFETY: the header's last byte is inside buf.
        unsafe { *payload.as_ptr().sub(1) ^= 0x01 };
        // SAFETY: payload is still inside buf.
        assert!(!unsafe { verify(payload, 8, 9) });
    }
}
