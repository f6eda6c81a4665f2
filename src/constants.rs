//! Crate wide constants
use std::time::Duration;

/// The deepest refinement level supported by either key flavor.
pub const MAX_REFINEMENT_LEVEL: u8 = 21;

/// Number of unit cells across each dimension of the domain.
pub const LEVEL_SIZE: u32 = 1 << MAX_REFINEMENT_LEVEL;

/// Upper bound (exclusive) of valid coordinates; the domain is `[0, MAX_EXTENT)^3`.
pub const MAX_EXTENT: f32 = LEVEL_SIZE as f32;

/// A refined tetrahedron has eight children, like a cube.
pub const CHILDREN_PER_TET: usize = 8;

/// Number of distinct tetrahedral types produced by Bey refinement.
pub const TET_TYPES: usize = 6;

/// Shared tolerance for the geometric predicates.
pub const GEOMETRIC_TOLERANCE: f64 = 1e-6;

/// Default deadline for a single lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
