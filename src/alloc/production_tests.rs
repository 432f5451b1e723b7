//! Production scenario tests for the Fibonacci allocator
//!
//! These tests drive the allocator the way a GPU heap owner would: mixed-size
//! resources with flexible sizes, frees in arbitrary order, and a full drain.

#[cfg(test)]
mod integration {
    use crate::alloc::{Allocation, FibAlloc};

    #[test]
    fn test_production_mixed_pools() -> crate::error::Result<()> {
        let mut heap = FibAlloc::with_label("vram", 32)?; // 5702887 units

        let mut live: Vec<Allocation> = Vec::new();
        for i in 0..200u64 {
            let minimum = 64 + (i % 7) * 512;
            let preferred = minimum * 2;
            live.push(heap.allocate(minimum, preferred)?);
        }
        heap.verify()?;

        // Every pool got at least what it asked for
        for (i, allocation) in live.iter().enumerate() {
            assert!(allocation.size >= 64 + (i as u64 % 7) * 512);
        }

        // Free every other pool, then refill the holes with small requests
        let (freed, kept): (Vec<_>, Vec<_>) =
            live.into_iter().enumerate().partition(|(i, _)| i % 2 == 0);
        for (_, allocation) in &freed {
            heap.free(allocation.offset);
        }
        heap.verify()?;

        let mut refilled = 0;
        while let Ok(allocation) = heap.allocate(32, 32) {
            assert!(allocation.size >= 32);
            refilled += 1;
            if refilled == 500 {
                break;
            }
        }
        assert!(refilled > 0);
        heap.verify()?;

        let stats = heap.stats();
        println!(
            "Production mixed pools: {} allocations, {:.2}% used, {:.2}% fragmented",
            stats.allocation_count,
            stats.utilization() * 100.0,
            stats.fragmentation() * 100.0
        );
        assert_eq!(stats.allocation_count, (kept.len() + refilled) as u64);
        Ok(())
    }

    #[test]
    fn test_production_drain_in_reverse() -> crate::error::Result<()> {
        let mut heap = FibAlloc::new(16)?; // 2584 units

        let mut live = Vec::new();
        loop {
            match heap.allocate(3, 21) {
                Ok(allocation) => live.push(allocation),
                Err(e) => {
                    assert!(e.is_exhausted());
                    break;
                }
            }
        }
        assert!(heap.stats().free_units < 3 * 2);

        for allocation in live.iter().rev() {
            heap.free(allocation.offset);
        }
        heap.verify()?;

        let stats = heap.stats();
        assert_eq!(stats.live_nodes, 1);
        assert_eq!(stats.largest_free_block, heap.capacity());
        Ok(())
    }

    #[test]
    fn test_production_largest_pool() -> crate::error::Result<()> {
        let mut heap = FibAlloc::new(crate::alloc::MAX_LEVEL)?;

        let small = heap.allocate_exact(1)?;
        let big = heap.allocate(1 << 40, u64::MAX)?;
        assert!(big.size >= 1 << 40);
        assert!(big.end() <= heap.capacity());
        heap.verify()?;

        heap.free(big.offset);
        heap.free(small.offset);
        heap.verify()?;
        assert!(heap.is_empty());
        Ok(())
    }
}
