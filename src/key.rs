//! The key trait shared by the octree and tetree flavors.
//!
//! Everything the index and the query kernel need from a key is expressed
//! here, so one generic implementation serves both partitionings.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::SpatialError;
use crate::geometry::Aabb;
use crate::morton::MortonKey;
use crate::tetree::TetKey;
use crate::types::{Coord, PointType};

/// A totally ordered spatial key of a hierarchical partitioning.
///
/// The order is level-major with the space-filling-curve code within a
/// level. Parent and child are functions of the key; no edges are stored.
pub trait SpatialKey:
    Copy + Clone + Eq + Ord + Hash + Debug + Send + Sync + 'static
{
    /// Refinement level of the cell, 0 for a root.
    fn level(&self) -> u8;

    /// The parent key, `None` at the root.
    fn parent(&self) -> Option<Self>;

    /// All children in SFC order; empty on the deepest level.
    fn children(&self) -> Vec<Self>;

    /// Key of the cell enclosing `point` at `level`.
    fn enclosing(point: &Coord, level: u8) -> Result<Self, SpatialError>;

    /// Keys of every cell at `level` overlapping `bounds`.
    fn overlapping_keys(bounds: &Aabb, level: u8) -> Vec<Self>;

    /// Axis-aligned bounds of the cell.
    fn cell_bounds(&self) -> Aabb;

    /// Whether the cell contains the point.
    fn contains_point(&self, point: &Coord) -> bool;

    /// Edge length of a cell at `level`.
    fn edge_length(level: u8) -> PointType;

    /// Whether `self` is a strict ancestor of `other`.
    fn is_ancestor_of(&self, other: &Self) -> bool;

    /// Inclusive key range at `level` covering every cell that overlaps
    /// `bounds`, or `None` when the flavor has no contiguous range and
    /// callers should scan the level instead.
    fn range_hint(bounds: &Aabb, level: u8) -> Option<(Self, Self)>;

    /// Single integer preserving the key order; used for ordered lock
    /// acquisition.
    fn order_token(&self) -> u128;

    /// Squared distance from `point` to the cell.
    fn min_distance_squared(&self, point: &Coord) -> f64 {
        self.cell_bounds().min_distance_squared(point)
    }
}

impl SpatialKey for MortonKey {
    fn level(&self) -> u8 {
        MortonKey::level(self)
    }

    fn parent(&self) -> Option<Self> {
        MortonKey::parent(self)
    }

    fn children(&self) -> Vec<Self> {
        MortonKey::children(self)
    }

    fn enclosing(point: &Coord, level: u8) -> Result<Self, SpatialError> {
        MortonKey::enclosing(point, level)
    }

    fn overlapping_keys(bounds: &Aabb, level: u8) -> Vec<Self> {
        MortonKey::overlapping_keys(bounds, level)
    }

    fn cell_bounds(&self) -> Aabb {
        MortonKey::cell_bounds(self)
    }

    fn contains_point(&self, point: &Coord) -> bool {
        MortonKey::contains_point(self, point)
    }

    fn edge_length(level: u8) -> PointType {
        MortonKey::edge_length(level)
    }

    fn is_ancestor_of(&self, other: &Self) -> bool {
        MortonKey::is_ancestor_of(self, other)
    }

    /// Morton codes are componentwise monotone, so the codes of the two
    /// extreme corners bound every cell overlapping the box.
    fn range_hint(bounds: &Aabb, level: u8) -> Option<(Self, Self)> {
        use crate::constants::MAX_EXTENT;
        let clamp = |point: &Coord| -> Coord {
            [
                point[0].max(0.0).min(MAX_EXTENT - 0.5),
                point[1].max(0.0).min(MAX_EXTENT - 0.5),
                point[2].max(0.0).min(MAX_EXTENT - 0.5),
            ]
        };
        let lo = MortonKey::enclosing(&clamp(&bounds.min), level).ok()?;
        let hi = MortonKey::enclosing(&clamp(&bounds.max), level).ok()?;
        Some((lo, hi))
    }

    fn order_token(&self) -> u128 {
        self.sort_token()
    }
}

impl SpatialKey for TetKey {
    fn level(&self) -> u8 {
        TetKey::level(self)
    }

    fn parent(&self) -> Option<Self> {
        TetKey::parent(self)
    }

    fn children(&self) -> Vec<Self> {
        TetKey::children(self)
    }

    fn enclosing(point: &Coord, level: u8) -> Result<Self, SpatialError> {
        TetKey::enclosing(point, level)
    }

    fn overlapping_keys(bounds: &Aabb, level: u8) -> Vec<Self> {
        TetKey::overlapping_keys(bounds, level)
    }

    fn cell_bounds(&self) -> Aabb {
        TetKey::cell_bounds(self)
    }

    fn contains_point(&self, point: &Coord) -> bool {
        TetKey::contains_point(self, point)
    }

    fn edge_length(level: u8) -> PointType {
        TetKey::edge_length(level)
    }

    fn is_ancestor_of(&self, other: &Self) -> bool {
        TetKey::is_ancestor_of(self, other)
    }

    /// The TM order interleaves the six root tetrahedra, so one box has no
    /// contiguous key range; level scans filter by cell bounds instead.
    fn range_hint(_bounds: &Aabb, _level: u8) -> Option<(Self, Self)> {
        None
    }

    fn order_token(&self) -> u128 {
        self.sort_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_key_contract<K: SpatialKey>() {
        let point = [1500.0, 2500.0, 3500.0];
        let key = K::enclosing(&point, 8).unwrap();

        assert_eq!(key.level(), 8);
        assert!(key.contains_point(&point));
        assert!(key.cell_bounds().contains_point(&point));

        let parent = key.parent().unwrap();
        assert!(parent.is_ancestor_of(&key));
        assert!(parent.children().contains(&key));

        for child in key.children() {
            assert_eq!(child.parent().unwrap(), key);
            assert!(key.order_token() < child.order_token());
        }
    }

    #[test]
    fn test_morton_key_contract() {
        check_key_contract::<MortonKey>();
    }

    #[test]
    fn test_tet_key_contract() {
        check_key_contract::<TetKey>();
    }

    #[test]
    fn test_morton_range_hint_covers_overlaps() {
        let bounds = Aabb::new([100.0, 100.0, 100.0], [5000.0, 5000.0, 5000.0]).unwrap();
        let (lo, hi) = MortonKey::range_hint(&bounds, 9).unwrap();
        for key in MortonKey::overlapping_keys(&bounds, 9) {
            assert!(lo <= key && key <= hi);
        }
    }
}
