use heapcheck_membrane::{
    CappedAllocator, DebugConfig, FreeResult, LibcAllocator, MemoryDebugger, Site,
    StatisticsSnapshot, site,
};

fn debugger() -> MemoryDebugger {
    MemoryDebugger::with_config(LibcAllocator, &DebugConfig::silent())
}

#[test]
fn free_then_allocate_again_accumulates_totals() {
    let dbg = debugger();
    let first = dbg.allocate(16, site!()).expect("allocate 16");
    dbg.free(first.as_ptr(), site!());
    let second = dbg.allocate(32, site!()).expect("allocate 32");

    let snap = dbg.statistics();
    assert_eq!(snap.total_count, 2);
    assert_eq!(snap.total_bytes, 48);
    assert_eq!(snap.active_count, 1);
    assert_eq!(snap.active_bytes, 32);
    assert_eq!(snap.fail_count, 0);

    dbg.free(second.as_ptr(), site!());
}

#[test]
fn freeing_a_foreign_pointer_leaves_statistics_unchanged() {
    let dbg = debugger();
    let live = dbg.allocate(64, site!()).unwrap();
    let before = dbg.statistics();

    let foreign = Box::into_raw(Box::new(0u64)).cast::<u8>();
    let result = dbg.free(foreign, site!());
    assert!(result.is_bug());
    assert_eq!(dbg.statistics(), before);
    assert_eq!(dbg.bug_tally().not_allocated, 1);

    // SAFETY: foreign came from Box::into_raw above and was never released.
    drop(unsafe { Box::from_raw(foreign.cast::<u64>()) });
    dbg.free(live.as_ptr(), site!());
}

#[test]
fn heap_bounds_cover_every_payload_and_survive_frees() {
    let dbg = debugger();
    let sizes = [24usize, 1, 300, 7, 4096];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| dbg.allocate(size, site!()).unwrap())
        .collect();

    let lowest = ptrs.iter().map(|p| p.as_ptr() as usize).min().unwrap();
    let highest = ptrs
        .iter()
        .zip(sizes)
        .map(|(p, size)| p.as_ptr() as usize + size)
        .max()
        .unwrap();

    let snap = dbg.statistics();
    assert_eq!(snap.heap_min, lowest);
    assert_eq!(snap.heap_max, highest);

    for ptr in &ptrs {
        dbg.free(ptr.as_ptr(), site!());
    }
    let after = dbg.statistics();
    assert_eq!(after.heap_min, lowest);
    assert_eq!(after.heap_max, highest);
    assert_eq!(after.active_count, 0);
}

#[test]
fn reallocate_zero_matches_free() {
    let via_realloc = debugger();
    let p = via_realloc.allocate(40, site!()).unwrap();
    assert!(via_realloc.reallocate(p.as_ptr(), 0, site!()).is_none());

    let via_free = debugger();
    let q = via_free.allocate(40, site!()).unwrap();
    via_free.free(q.as_ptr(), site!());

    let a = via_realloc.statistics();
    let b = via_free.statistics();
    assert_eq!(
        (a.active_count, a.active_bytes, a.total_count, a.free_count, a.free_bytes),
        (b.active_count, b.active_bytes, b.total_count, b.free_count, b.free_bytes)
    );
}

#[test]
fn reallocate_of_dead_pointer_copies_nothing_and_reports() {
    let dbg = debugger();
    let p = dbg.allocate(16, site!()).unwrap();
    dbg.free(p.as_ptr(), site!());

    let q = dbg.reallocate(p.as_ptr(), 16, site!()).expect("fresh block");
    let snap = dbg.statistics();
    assert_eq!(snap.active_count, 1);
    assert_eq!(snap.free_count, 1);
    assert_eq!(dbg.bug_tally().total, 1);
    dbg.free(q.as_ptr(), site!());
}

#[test]
fn zero_allocate_with_zero_elements_returns_none() {
    let dbg = debugger();
    assert!(dbg.zero_allocate(0, 16, site!()).is_none());
    assert!(dbg.zero_allocate(16, 0, site!()).is_none());
    assert_eq!(dbg.statistics(), StatisticsSnapshot::default());
}

#[test]
fn failure_on_capped_allocator_is_counted_not_fatal() {
    let dbg = MemoryDebugger::with_config(
        CappedAllocator::new(LibcAllocator, 1 << 12),
        &DebugConfig::silent(),
    );
    for _ in 0..3 {
        assert!(dbg.allocate(1 << 20, site!()).is_none());
    }
    let snap = dbg.statistics();
    assert_eq!(snap.fail_count, 3);
    assert_eq!(snap.fail_bytes, 3 << 20);
    assert_eq!(snap.total_count, 0);
}

#[test]
fn statistics_text_has_two_report_lines() {
    let dbg = debugger();
    let p = dbg.allocate(100, site!()).unwrap();
    let mut out = Vec::new();
    dbg.write_statistics(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("malloc count: active          1"));
    assert!(lines[1].starts_with("malloc size:  active        100"));
    dbg.free(p.as_ptr(), site!());
}

#[test]
fn leak_report_names_allocation_site() {
    let dbg = debugger();
    let site = Site::new("driver.rs", 42);
    let p = dbg.allocate(77, site).unwrap();
    let mut out = Vec::new();
    dbg.write_leak_report(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!(
            "LEAK CHECK: driver.rs:42: allocated object {:#x} with size 77\n",
            p.as_ptr() as usize
        )
    );
}

#[test]
fn concurrent_requests_keep_counts_consistent() {
    use std::sync::Arc;
    use std::thread;

    const THREADS: usize = 4;
    const ROUNDS: usize = 500;

    let dbg = Arc::new(debugger());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let dbg = Arc::clone(&dbg);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let size = 1 + (t * ROUNDS + round) % 97;
                    let p = dbg.allocate(size, site!()).expect("allocate");
                    assert_eq!(dbg.free(p.as_ptr(), site!()), FreeResult::Freed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snap = dbg.statistics();
    assert_eq!(snap.total_count, (THREADS * ROUNDS) as u64);
    assert_eq!(snap.free_count, snap.total_count);
    assert_eq!(snap.active_count, 0);
    assert_eq!(snap.active_bytes, 0);
    assert_eq!(dbg.bug_tally().total, 0);
}
