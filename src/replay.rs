//! Replay of recorded allocation sequences
//!
//! A script is a JSON document listing operations on named blocks:
//!
//! ```json
//! {
//!   "ops": [
//!     { "op": "alloc", "name": "vertices", "minimum": 3000, "preferred": 4096 },
//!     { "op": "alloc", "name": "indices", "minimum": 900 },
//!     { "op": "free", "name": "vertices" },
//!     { "op": "verify" }
//!   ]
//! }
//! ```
//!
//! Layouts are deterministic, so replaying a script always produces the same
//! offsets. Running out of space is recorded as an outcome, not an error.

use crate::alloc::{Allocation, AllocatorStats, FibAlloc};
use crate::error::{Error, Result};
use crate::metrics::AllocatorMetrics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// One scripted operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Allocate a block and remember it under `name`
    Alloc {
        name: String,
        minimum: u64,
        /// Defaults to `minimum`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred: Option<u64>,
    },
    /// Free the block remembered under `name`
    Free { name: String },
    /// Check allocator consistency
    Verify,
}

/// A sequence of operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub ops: Vec<Op>,
}

impl Script {
    /// Parse a script from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Script(format!("Invalid script: {}", e)))
    }

    /// Load a script from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }
}

/// What happened to one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Allocated {
        name: String,
        #[serde(flatten)]
        allocation: Allocation,
    },
    Exhausted {
        name: String,
        minimum: u64,
    },
    Freed {
        name: String,
        #[serde(flatten)]
        allocation: Allocation,
    },
    Verified,
}

/// Result of running a script
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub outcomes: Vec<Outcome>,
    /// Blocks still allocated at the end, by name
    pub outstanding: Vec<(String, Allocation)>,
    pub stats: AllocatorStats,
}

impl ReplayReport {
    /// Number of allocations that didn't fit
    pub fn exhausted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Outcome::Exhausted { .. }))
            .count()
    }
}

/// Runs scripts against an allocator, tracking named blocks
pub struct Replayer<'a> {
    allocator: &'a mut FibAlloc,
    live: HashMap<String, Allocation>,
    metrics: Option<AllocatorMetrics>,
}

impl<'a> Replayer<'a> {
    pub fn new(allocator: &'a mut FibAlloc) -> Self {
        Self {
            allocator,
            live: HashMap::new(),
            metrics: None,
        }
    }

    /// Also report every operation to Prometheus
    pub fn with_metrics(mut self) -> Self {
        self.metrics = Some(AllocatorMetrics::new(self.allocator.label()));
        self
    }

    /// Run all operations of `script` in order
    ///
    /// Stops at the first operation that can't be applied: freeing an unknown
    /// name, reusing a live name, or a failed verification. Blocks allocated before
    /// that point stay allocated; the error lists them as `name@offset`, and
    /// [`FibAlloc::allocations`] returns them as well.
    pub fn run(mut self, script: &Script) -> Result<ReplayReport> {
        info!(
            label = %self.allocator.label(),
            ops = script.ops.len(),
            "Replaying allocation script"
        );

        let mut outcomes = Vec::with_capacity(script.ops.len());
        for (index, op) in script.ops.iter().enumerate() {
            let outcome = match self.apply(op) {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort(index, e)),
            };
            debug!(index, ?outcome, "Applied op");
            outcomes.push(outcome);
        }

        let stats = self.allocator.stats();
        if let Some(metrics) = &self.metrics {
            metrics.observe(&stats);
        }

        Ok(ReplayReport {
            outcomes,
            outstanding: self.outstanding(),
            stats,
        })
    }

    /// Named blocks still allocated, by offset
    fn outstanding(&self) -> Vec<(String, Allocation)> {
        let mut outstanding: Vec<(String, Allocation)> = self
            .live
            .iter()
            .map(|(name, allocation)| (name.clone(), *allocation))
            .collect();
        outstanding.sort_by_key(|(_, allocation)| allocation.offset);
        outstanding
    }

    fn abort(&self, index: usize, error: Error) -> Error {
        let outstanding = self
            .outstanding()
            .iter()
            .map(|(name, allocation)| format!("{}@{}", name, allocation.offset))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            index,
            error = %error,
            outstanding = %outstanding,
            "Replay stopped with blocks still allocated"
        );
        Error::Script(format!(
            "op {}: {} (outstanding: [{}])",
            index, error, outstanding
        ))
    }

    fn apply(&mut self, op: &Op) -> Result<Outcome> {
        match op {
            Op::Alloc {
                name,
                minimum,
                preferred,
            } => {
                if self.live.contains_key(name) {
                    return Err(Error::Script(format!("'{}' is already allocated", name)));
                }
                let result = self
                    .allocator
                    .allocate(*minimum, preferred.unwrap_or(*minimum));
                if let Some(metrics) = &self.metrics {
                    metrics.record_allocation(&result);
                }
                match result {
                    Ok(allocation) => {
                        self.live.insert(name.clone(), allocation);
                        Ok(Outcome::Allocated {
                            name: name.clone(),
                            allocation,
                        })
                    }
                    Err(e) if e.is_exhausted() => {
                        warn!(name = %name, minimum, "Scripted allocation did not fit");
                        Ok(Outcome::Exhausted {
                            name: name.clone(),
                            minimum: *minimum,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Op::Free { name } => {
                let allocation = self
                    .live
                    .remove(name)
                    .ok_or_else(|| Error::Script(format!("'{}' is not allocated", name)))?;
                let freed = self.allocator.free(allocation.offset);
                if let Some(metrics) = &self.metrics {
                    metrics.record_free();
                }
                Ok(Outcome::Freed {
                    name: name.clone(),
                    allocation: freed,
                })
            }
            Op::Verify => {
                self.allocator.verify()?;
                Ok(Outcome::Verified)
            }
        }
    }
}
