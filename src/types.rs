//! Definition of basic types

use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_LOCK_TIMEOUT, MAX_REFINEMENT_LEVEL};
use crate::error::SpatialError;

/// Scalar type of stored positions. Geometry predicates upcast to `f64`.
pub type PointType = f32;

/// Cartesian coordinates (x, y, z).
pub type Coord = [PointType; 3];

/// Totally ordered opaque entity identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// How an entity whose bounds overlap several cells is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanningPolicy {
    /// The key set is always the enclosing cell of the position.
    SingleNodeOnly,
    /// The id is replicated into every node the bounds overlap.
    SpanToOverlapping,
    /// The id is replicated only into overlapping leaves.
    SpanToLeavesOnly,
}

impl SpanningPolicy {
    pub fn spanning_enabled(&self) -> bool {
        !matches!(self, SpanningPolicy::SingleNodeOnly)
    }
}

/// Per-node read discipline of the concurrency controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockingMode {
    /// Always take the write lock.
    Conservative,
    /// Take a read lock where a read suffices.
    Adaptive,
    /// Try stamp-validated reads, falling back to the read lock.
    Optimistic,
}

/// Construction-time configuration of a spatial index.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Deepest level entities may be inserted at.
    pub max_level: u8,
    /// Per-node entity count above which the balancer splits.
    pub capacity_hint: u32,
    pub spanning_policy: SpanningPolicy,
    pub locking_mode: LockingMode,
    /// Deadline applied to every lock acquisition.
    pub lock_timeout: Duration,
    /// An entity spans when its largest extent exceeds this fraction of
    /// the node edge length.
    pub min_span_threshold: PointType,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_level: MAX_REFINEMENT_LEVEL,
            capacity_hint: 32,
            spanning_policy: SpanningPolicy::SpanToOverlapping,
            locking_mode: LockingMode::Adaptive,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            min_span_threshold: 0.5,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), SpatialError> {
        if self.max_level > MAX_REFINEMENT_LEVEL {
            return Err(SpatialError::InvalidArgument(format!(
                "max_level {} exceeds {}",
                self.max_level, MAX_REFINEMENT_LEVEL
            )));
        }
        if self.capacity_hint == 0 {
            return Err(SpatialError::InvalidArgument(
                "capacity_hint must be positive".to_string(),
            ));
        }
        if !(self.min_span_threshold.is_finite() && self.min_span_threshold >= 0.0) {
            return Err(SpatialError::InvalidArgument(
                "min_span_threshold must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuning knobs for bulk loading.
#[derive(Clone, Debug, Default)]
pub struct BulkConfig {
    /// Bound of the deferred-subdivision queue. Defaults to
    /// `capacity_hint * 8` when unset.
    pub deferred_split_limit: Option<usize>,
}

/// Aggregate counters reported by `get_stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub node_count: usize,
    pub entity_count: usize,
    /// Sum of per-node entity set sizes; exceeds `entity_count` when
    /// entities span several nodes.
    pub total_entity_references: usize,
    pub max_depth: u8,
}

/// Outcome record of a batch insertion.
#[derive(Clone, Debug, Default)]
pub struct BatchInsertionResult {
    pub inserted_ids: Vec<EntityId>,
    pub success_count: usize,
    pub failure_count: usize,
    /// `(input index, reason)` for every rejected input.
    pub failures: Vec<(usize, String)>,
    pub elapsed: Duration,
    pub nodes_created: usize,
    pub nodes_modified: usize,
    pub subdivisions_deferred: usize,
}
