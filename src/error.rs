//! Error types surfaced by the index.

use thiserror::Error;

/// Errors produced by index operations.
///
/// `LevelOverflow` and `GeometryDegenerate` are recovered locally and only
/// reach callers that ask for a strict answer; the remaining kinds are
/// surfaced immediately.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Negative coordinate, out-of-range level, zero capacity and similar
    /// caller errors. Fail fast, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation that requires an entity was given an unknown id.
    #[error("unknown entity {0}")]
    NotFound(u64),

    /// A lock could not be acquired before the deadline. The index is
    /// consistent afterwards; callers may retry.
    #[error("lock timeout on node {key}")]
    LockTimeout { key: String },

    /// A lock was requested out of ascending key order while other node
    /// locks were held. Callers must reorder their acquisitions.
    #[error("deadlock hazard: requested {requested} while holding {held}")]
    DeadlockHazard { requested: String, held: String },

    /// The deferred-subdivision queue overflowed during bulk loading.
    /// Finalize the bulk load and retry.
    #[error("bulk queue capacity exceeded ({0} deferred subdivisions)")]
    CapacityExceeded(usize),

    /// A split was attempted at the maximum refinement level.
    #[error("cannot split a node at maximum refinement level {0}")]
    LevelOverflow(u8),

    /// Collinear or coplanar inputs defeated a tetrahedral predicate.
    #[error("degenerate geometry: {0}")]
    GeometryDegenerate(String),
}
