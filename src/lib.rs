// FibAlloc - Fibonacci buddy allocator
// Sub-allocates offsets in a fixed-capacity pool, such as a GPU heap

#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod config;
pub mod metrics;
pub mod replay;

// Re-exports for convenience
pub use alloc::{Allocation, AllocatorStats, Block, FibAlloc};
pub use config::FibAllocConfig;
pub use replay::{Replayer, Script};

/// FibAlloc error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Allocation of at least {minimum} units does not fit in a pool of {capacity}")]
        Exhausted { minimum: u64, capacity: u64 },

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Offset {offset} was not returned by allocate or has already been freed")]
        InvalidFree { offset: u64 },

        #[error("Allocator state corrupted: {0}")]
        Corrupted(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Script error: {0}")]
        Script(String),

        #[error("Metrics error: {0}")]
        Metrics(String),

        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
    }

    impl Error {
        /// Whether the pool was too full for the request; the caller may retry smaller
        /// or allocate elsewhere
        pub fn is_exhausted(&self) -> bool {
            matches!(self, Error::Exhausted { .. })
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_messages() {
        let exhausted = Error::Exhausted {
            minimum: 9,
            capacity: 8,
        };
        assert!(exhausted.is_exhausted());
        assert_eq!(
            exhausted.to_string(),
            "Allocation of at least 9 units does not fit in a pool of 8"
        );

        let invalid = Error::InvalidFree { offset: 5 };
        assert!(!invalid.is_exhausted());
        assert!(invalid.to_string().contains("Offset 5"));
    }
}
