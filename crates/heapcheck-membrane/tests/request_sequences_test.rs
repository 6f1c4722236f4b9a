use heapcheck_membrane::{DebugConfig, FreeResult, LibcAllocator, MemoryDebugger, site};
use std::ptr::NonNull;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Freed,
}

fn fill(ptr: NonNull<u8>, len: usize, tag: u8) {
    // SAFETY: callers pass a live block of at least `len` bytes.
    unsafe { std::ptr::write_bytes(ptr.as_ptr(), tag, len) };
}

fn holds(ptr: NonNull<u8>, len: usize, tag: u8) -> bool {
    // SAFETY: callers pass a live block of at least `len` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
    bytes.iter().all(|&b| b == tag)
}

#[test]
fn deterministic_request_sequences_hold_accounting_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;

    for seed in SEEDS {
        let dbg = MemoryDebugger::with_config(LibcAllocator, &DebugConfig::silent());
        let mut rng = XorShift64::new(seed);

        let mut ptrs: [Option<NonNull<u8>>; SLOTS] = [None; SLOTS];
        let mut sizes = [0_usize; SLOTS];
        let mut states = [SlotState::Empty; SLOTS];

        let mut expected_total = 0_u64;
        let mut expected_total_bytes = 0_u64;
        let mut expected_frees = 0_u64;
        let mut expected_bugs = 0_u64;

        for step in 0..STEPS {
            let slot = rng.gen_range(0, SLOTS - 1);
            let tag = (slot as u8).wrapping_add(1);
            match (states[slot], rng.gen_range(0, 3)) {
                (SlotState::Empty | SlotState::Freed, _) => {
                    let size = rng.gen_range(1, 512);
                    let ptr = dbg.allocate(size, site!()).expect("allocate");
                    fill(ptr, size, tag);
                    ptrs[slot] = Some(ptr);
                    sizes[slot] = size;
                    states[slot] = SlotState::Live;
                    expected_total += 1;
                    expected_total_bytes += size as u64;
                }
                (SlotState::Live, 0) => {
                    let ptr = ptrs[slot].unwrap();
                    assert!(holds(ptr, sizes[slot], tag), "seed={seed} step={step}: payload clobbered");
                    assert_eq!(dbg.free(ptr.as_ptr(), site!()), FreeResult::Freed);
                    states[slot] = SlotState::Freed;
                    expected_frees += 1;
                }
                (SlotState::Live, 1) => {
                    let old = ptrs[slot].unwrap();
                    let new_size = rng.gen_range(1, 512);
                    let keep = sizes[slot].min(new_size);
                    let new = dbg.reallocate(old.as_ptr(), new_size, site!()).expect("reallocate");
                    assert!(holds(new, keep, tag), "seed={seed} step={step}: realloc lost bytes");
                    fill(new, new_size, tag);
                    ptrs[slot] = Some(new);
                    sizes[slot] = new_size;
                    expected_total += 1;
                    expected_total_bytes += new_size as u64;
                    expected_frees += 1;
                }
                (SlotState::Live, _) => {
                    // Double free of a sibling that is already dead, if any.
                    let victim = (slot + 1) % SLOTS;
                    let reused = states
                        .iter()
                        .zip(ptrs)
                        .any(|(s, p)| *s == SlotState::Live && p == ptrs[victim]);
                    if states[victim] == SlotState::Freed && !reused {
                        let result = dbg.free(ptrs[victim].unwrap().as_ptr(), site!());
                        assert!(result.is_bug(), "seed={seed} step={step}: double free accepted");
                        expected_bugs += 1;
                    }
                }
            }

            let snap = dbg.statistics();
            let live = states.iter().filter(|s| **s == SlotState::Live).count() as u64;
            let live_bytes: u64 = states
                .iter()
                .zip(sizes)
                .filter(|(s, _)| **s == SlotState::Live)
                .map(|(_, size)| size as u64)
                .sum();
            assert_eq!(snap.total_count, expected_total, "seed={seed} step={step}");
            assert_eq!(snap.total_bytes, expected_total_bytes, "seed={seed} step={step}");
            assert_eq!(snap.free_count, expected_frees, "seed={seed} step={step}");
            assert_eq!(snap.active_count, live, "seed={seed} step={step}");
            assert_eq!(snap.active_bytes, live_bytes, "seed={seed} step={step}");
            assert_eq!(snap.fail_count, 0, "seed={seed} step={step}");
            assert!(snap.heap_min <= snap.heap_max, "seed={seed} step={step}");
        }

        assert_eq!(dbg.bug_tally().not_allocated, expected_bugs, "seed={seed}");
        assert_eq!(dbg.live_blocks().len(), states.iter().filter(|s| **s == SlotState::Live).count());
    }
}
