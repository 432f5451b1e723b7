//! End-to-end behavior of the public allocator API

use fiballoc::alloc::{level_for_at_least, level_for_at_most, size, MAX_LEVEL, SIZES};
use fiballoc::error::{Error, Result};
use fiballoc::{Allocation, FibAlloc, FibAllocConfig};

#[test]
fn test_size_table_is_fibonacci() {
    assert_eq!(&SIZES[..5], &[1, 2, 3, 5, 8]);
    for level in 2..=MAX_LEVEL {
        assert_eq!(size(level), size(level - 1) + size(level - 2));
    }
    assert!(SIZES.windows(2).all(|pair| pair[0] < pair[1]));

    assert_eq!(level_for_at_least(4), Some(3));
    assert_eq!(level_for_at_least(5), Some(3));
    assert_eq!(level_for_at_least(u64::MAX), None);
    assert_eq!(level_for_at_most(4), Some(2));
    assert_eq!(level_for_at_most(u64::MAX), Some(MAX_LEVEL));
}

#[test]
fn test_fill_exhaust_and_restore() -> Result<()> {
    let mut fib = FibAlloc::new(4)?;

    let small = fib.allocate(3, 3)?;
    assert_eq!((small.offset, small.level), (0, 2));
    let large = fib.allocate(5, 5)?;
    assert_eq!((large.offset, large.level), (3, 3));

    match fib.allocate(1, 1) {
        Err(Error::Exhausted { minimum, capacity }) => {
            assert_eq!((minimum, capacity), (1, 8));
        }
        other => panic!("Expected exhaustion, got {:?}", other),
    }

    fib.free(3);
    fib.free(0);
    fib.verify()?;

    let stats = fib.stats();
    assert_eq!(stats.live_nodes, 1);
    assert_eq!(stats.free_blocks(), 1);
    assert_eq!(stats.largest_free_block, 8);
    assert_eq!(stats.counters.splits, stats.counters.merges);
    Ok(())
}

#[test]
fn test_reallocation_is_deterministic() -> Result<()> {
    let requests = [(3, 7), (1, 1), (20, 40), (2, 2), (9, 13)];

    let run = || -> Result<Vec<Allocation>> {
        let mut fib = FibAlloc::new(12)?;
        requests
            .iter()
            .map(|&(minimum, preferred)| fib.allocate(minimum, preferred))
            .collect()
    };

    assert_eq!(run()?, run()?);
    Ok(())
}

#[test]
fn test_allocations_never_overlap() -> Result<()> {
    let mut fib = FibAlloc::new(14)?; // 987 units
    let mut live = Vec::new();
    let mut request = 1;
    loop {
        match fib.allocate(request, request * 2) {
            Ok(allocation) => {
                assert!(allocation.size >= request);
                live.push(allocation);
            }
            Err(e) if e.is_exhausted() => break,
            Err(e) => return Err(e),
        }
        request = request % 17 + 1;
    }

    live.sort_by_key(|a| a.offset);
    for pair in live.windows(2) {
        assert!(pair[0].end() <= pair[1].offset);
    }
    assert_eq!(fib.allocations(), live);
    assert_eq!(
        fib.allocated_units(),
        live.iter().map(|a| a.size).sum::<u64>()
    );
    fib.verify()
}

#[test]
fn test_exclusive_use_across_threads() -> Result<()> {
    // Independent instances need no coordination
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || -> Result<u64> {
                let mut fib = FibAlloc::with_label(format!("worker-{}", i), 24)?;
                let mut units = 0;
                for n in 1..=100 {
                    units += fib.allocate(n, n)?.size;
                }
                fib.verify()?;
                Ok(units)
            })
        })
        .collect();

    let totals: Vec<u64> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Result<_>>()?;
    assert!(totals.windows(2).all(|pair| pair[0] == pair[1]));

    // A shared instance goes behind the caller's lock
    let shared = std::sync::Arc::new(std::sync::Mutex::new(FibAlloc::new(20)?));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let allocation = shared.lock().unwrap().allocate(8, 8).unwrap();
                    shared.lock().unwrap().free(allocation.offset);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let fib = shared.lock().unwrap();
    assert!(fib.is_empty());
    fib.verify()
}

#[test]
fn test_configured_pool() -> Result<()> {
    let config = FibAllocConfig::from_toml("label = \"staging\"\ncapacity = 1000\n")?;
    let mut fib = FibAlloc::from_config(&config)?;
    assert_eq!(fib.label(), "staging");
    assert_eq!(fib.capacity(), 987);

    let block = fib.allocate(900, 1000)?;
    assert_eq!(block.size, 987);
    fib.free(block.offset);
    fib.shutdown();
    Ok(())
}
