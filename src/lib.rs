//! Octree and tetree spatial indexing over space-filling curves.

pub mod balance;
pub mod constants;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod index;
pub mod key;
pub mod locks;
pub mod morton;
pub mod node;
pub mod query;
pub mod tetree;
pub mod traverse;
pub mod types;

pub use crate::error::SpatialError;
pub use crate::geometry::{Aabb, Frustum, Plane3, Ray3, Sphere, Tetrahedron};
pub use crate::balance::RebalanceOutcome;
pub use crate::index::{Octree, SpatialIndex, Tetree};
pub use crate::key::SpatialKey;
pub use crate::locks::Deadline;
pub use crate::morton::MortonKey;
pub use crate::query::{CollisionPair, RayHit, SpatialNode, Volume};
pub use crate::tetree::TetKey;
pub use crate::traverse::{TraversalStrategy, Visit, Visitor};
pub use crate::types::{
    BatchInsertionResult, BulkConfig, EntityId, EntityStats, IndexConfig, LockingMode,
    SpanningPolicy,
};
