//! Fibonacci block size table
//!
//! Block sizes follow `1, 2, 3, 5, 8, ...` up to the largest Fibonacci number
//! that still fits in a `u64` offset. A block's *level* is its index in this table.

/// Number of levels in the size table
pub const LEVEL_COUNT: usize = count_levels();

/// Highest level an allocator can be created with
pub const MAX_LEVEL: usize = LEVEL_COUNT - 1;

/// Block size for every level, strictly increasing
pub static SIZES: [u64; LEVEL_COUNT] = build_table();

const fn count_levels() -> usize {
    let mut smaller = 1u64;
    let mut larger = 2u64;
    let mut count = 2;
    loop {
        match smaller.checked_add(larger) {
            Some(next) => {
                smaller = larger;
                larger = next;
                count += 1;
            }
            None => return count,
        }
    }
}

const fn build_table() -> [u64; LEVEL_COUNT] {
    let mut table = [0u64; LEVEL_COUNT];
    table[0] = 1;
    table[1] = 2;
    let mut level = 2;
    while level < LEVEL_COUNT {
        table[level] = table[level - 1] + table[level - 2];
        level += 1;
    }
    table
}

/// Size of a block on the given level
///
/// Panics if `level > MAX_LEVEL`.
#[inline]
pub fn size(level: usize) -> u64 {
    SIZES[level]
}

/// Smallest level whose block can hold `count` units
///
/// Returns `None` if no level in the table is large enough.
pub fn level_for_at_least(count: u64) -> Option<usize> {
    let level = SIZES.partition_point(|&size| size < count);
    (level < LEVEL_COUNT).then_some(level)
}

/// Largest level whose block does not exceed `count` units
///
/// Returns `None` for `count == 0`.
pub fn level_for_at_most(count: u64) -> Option<usize> {
    SIZES.partition_point(|&size| size <= count).checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        assert_eq!(LEVEL_COUNT, 92);
        assert_eq!(&SIZES[..8], &[1, 2, 3, 5, 8, 13, 21, 34]);
        assert_eq!(SIZES[45], 0xB119_24E1);
        assert_eq!(SIZES[MAX_LEVEL], 0xA94F_AD42_221F_2702);
        assert!(SIZES[MAX_LEVEL].checked_add(SIZES[MAX_LEVEL - 1]).is_none());
    }

    #[test]
    fn test_fibonacci_recurrence() {
        for level in 1..LEVEL_COUNT {
            assert!(size(level) > size(level - 1), "level {} not increasing", level);
        }
        for level in 2..LEVEL_COUNT {
            assert_eq!(size(level), size(level - 1) + size(level - 2));
        }
    }

    #[test]
    fn test_level_for_at_least() {
        assert_eq!(level_for_at_least(0), Some(0));
        assert_eq!(level_for_at_least(1), Some(0));
        assert_eq!(level_for_at_least(3), Some(2));
        assert_eq!(level_for_at_least(4), Some(3));
        assert_eq!(level_for_at_least(5), Some(3));
        assert_eq!(level_for_at_least(6), Some(4));
        assert_eq!(level_for_at_least(SIZES[MAX_LEVEL]), Some(MAX_LEVEL));
        assert_eq!(level_for_at_least(SIZES[MAX_LEVEL] + 1), None);
        assert_eq!(level_for_at_least(u64::MAX), None);
    }

    #[test]
    fn test_level_for_at_most() {
        assert_eq!(level_for_at_most(0), None);
        assert_eq!(level_for_at_most(1), Some(0));
        assert_eq!(level_for_at_most(4), Some(2));
        assert_eq!(level_for_at_most(8), Some(4));
        assert_eq!(level_for_at_most(12), Some(4));
        assert_eq!(level_for_at_most(u64::MAX), Some(MAX_LEVEL));
    }

    #[test]
    fn test_rounding_brackets_size() {
        for count in 1..1000u64 {
            let up = level_for_at_least(count).unwrap();
            let down = level_for_at_most(count).unwrap();
            assert!(size(up) >= count);
            assert!(size(down) <= count);
            assert!(up == down || up == down + 1);
        }
    }
}
