//! Allocator configuration
//!
//! Settings come from serde defaults, an optional TOML file and `FIBALLOC_*`
//! environment variables, in that order of precedence (last wins).
//!
//! ```toml
//! label = "vram"
//! capacity = 268435456
//! # or an explicit level, which takes precedence over capacity:
//! # largest_level = 40
//! reserve_nodes = 64
//! ```

use crate::alloc::sizes::{level_for_at_most, size, MAX_LEVEL};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Label used when none is configured
pub const DEFAULT_LABEL: &str = "fiballoc";

/// Pool capacity used when neither a level nor a capacity is configured (64 MiB)
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Environment variable prefix, e.g. `FIBALLOC_CAPACITY`
pub const ENV_PREFIX: &str = "FIBALLOC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FibAllocConfig {
    /// Name used in logs and metrics
    pub label: String,
    /// Level whose block size is the pool capacity
    pub largest_level: Option<usize>,
    /// Pool capacity in units, rounded down to a block size
    pub capacity: Option<u64>,
    /// Nodes to reserve up front (defaults to `largest_level + 1`)
    pub reserve_nodes: Option<usize>,
}

impl Default for FibAllocConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            largest_level: None,
            capacity: Some(DEFAULT_CAPACITY),
            reserve_nodes: None,
        }
    }
}

impl FibAllocConfig {
    /// Configuration for a pool of exactly `largest_level`
    pub fn with_largest_level(largest_level: usize) -> Self {
        Self {
            largest_level: Some(largest_level),
            capacity: None,
            ..Self::default()
        }
    }

    /// Load configuration from an optional TOML file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading allocator configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|settings| settings.try_deserialize::<Self>())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Largest level of the configured pool
    ///
    /// An explicit `largest_level` wins over `capacity`; a capacity that isn't a
    /// block size is rounded down.
    pub fn resolve_largest_level(&self) -> Result<usize> {
        if let Some(level) = self.largest_level {
            if level > MAX_LEVEL {
                return Err(Error::Config(format!(
                    "largest_level {} exceeds the maximum of {}",
                    level, MAX_LEVEL
                )));
            }
            return Ok(level);
        }
        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY);
        let level = level_for_at_most(capacity)
            .ok_or_else(|| Error::Config("capacity must be at least 1".to_string()))?;
        if size(level) != capacity {
            debug!(
                "Capacity {} rounded down to block size {} (level {})",
                capacity,
                size(level),
                level
            );
        }
        Ok(level)
    }

    /// Nodes to reserve for a pool on `largest_level`
    ///
    /// A reservation larger than the tree can ever hold is rejected.
    pub fn resolve_reserve_nodes(&self, largest_level: usize) -> Result<usize> {
        let Some(reserve) = self.reserve_nodes else {
            return Ok(largest_level.saturating_add(1));
        };
        let limit = max_nodes(largest_level);
        if reserve > limit {
            return Err(Error::Config(format!(
                "reserve_nodes {} exceeds the {} nodes a level {} pool can use",
                reserve, limit, largest_level
            )));
        }
        Ok(reserve)
    }
}

/// Most nodes a pool on `largest_level` can hold at once
///
/// Every live node besides the root splits a block of at least two units, so there
/// are fewer split nodes than units. Node indices are `u32`.
pub fn max_nodes(largest_level: usize) -> usize {
    let by_units = size(largest_level.min(MAX_LEVEL));
    usize::try_from(by_units.min(u64::from(u32::MAX))).unwrap_or(u32::MAX as usize)
}
