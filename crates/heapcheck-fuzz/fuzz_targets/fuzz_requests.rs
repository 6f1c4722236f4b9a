#![no_main]
use heapcheck_membrane::{DebugConfig, FreeResult, LibcAllocator, MemoryDebugger, site};
use libfuzzer_sys::fuzz_target;

// Each 4-byte chunk is one request: op, two size bytes, and a pick byte.
fuzz_target!(|data: &[u8]| {
    let dbg = MemoryDebugger::with_config(LibcAllocator, &DebugConfig::silent());
    let mut live = Vec::new();
    let mut dead = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let pick = usize::from(chunk[3]);
        match chunk[0] % 5 {
            0 => {
                if let Some(p) = dbg.allocate(size, site!()) {
                    live.push((p, size));
                }
            }
            1 if !live.is_empty() => {
                let (p, _) = live.swap_remove(pick % live.len());
                assert_eq!(dbg.free(p.as_ptr(), site!()), FreeResult::Freed);
                dead.push(p);
            }
            2 if !live.is_empty() => {
                let idx = pick % live.len();
                let (p, _) = live[idx];
                match dbg.reallocate(p.as_ptr(), size, site!()) {
                    Some(q) => live[idx] = (q, size),
                    None if size == 0 => {
                        live.swap_remove(idx);
                    }
                    None => {}
                }
            }
            3 if !dead.is_empty() => {
                let p = dead[pick % dead.len()];
                if live.iter().all(|(q, _)| *q != p) {
                    assert!(dbg.free(p.as_ptr(), site!()).is_bug());
                }
            }
            4 if !live.is_empty() => {
                // Interior pointer of a live block.
                let (p, len) = live[pick % live.len()];
                if len > 1 {
                    let inner = p.as_ptr().wrapping_add(1 + pick % (len - 1));
                    assert!(dbg.free(inner, site!()).is_bug());
                }
            }
            _ => {}
        }

        let snap = dbg.statistics();
        assert_eq!(snap.active_count, live.len() as u64);
        assert_eq!(snap.active_count, snap.total_count - snap.free_count);
    }
});
