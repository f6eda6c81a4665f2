//! Tetrahedral key algebra.
//!
//! A tetree cell is a tetrahedron of the recursive Bey refinement of the
//! six Kuhn simplices tiling the domain cube. A cell is identified by its
//! anchor coordinates, its level and its type in `0..6`. The connectivity
//! tables below drive parent/child navigation; they follow t8code's
//! `t8_dtet_connectivity.c` and changing them changes the geometric
//! identity of the tree.

use std::cmp::Ordering;

use crate::constants::{CHILDREN_PER_TET, LEVEL_SIZE, MAX_REFINEMENT_LEVEL, TET_TYPES};
use crate::error::SpatialError;
use crate::geometry::{Aabb, Tetrahedron};
use crate::morton::{decode_code, encode_grid, point_to_grid};
use crate::types::{Coord, PointType};

pub const ROOT_TET: TetKey = TetKey {
    x: 0,
    y: 0,
    z: 0,
    level: 0,
    ty: 0,
};

/// Parent type from the child's cube id and type.
pub const CUBE_ID_TYPE_TO_PARENT_TYPE: [[u8; 6]; 8] = [
    [0, 1, 2, 3, 4, 5],
    [0, 1, 1, 1, 0, 0],
    [2, 2, 2, 3, 3, 3],
    [1, 1, 2, 2, 2, 1],
    [5, 5, 4, 4, 4, 5],
    [0, 0, 0, 5, 5, 5],
    [4, 3, 3, 3, 4, 4],
    [0, 1, 2, 3, 4, 5],
];

/// Type of the child with Bey number `i` for a parent of a given type.
pub const TYPE_TO_TYPE_OF_CHILD: [[u8; 8]; 6] = [
    [0, 0, 0, 0, 4, 5, 2, 1],
    [1, 1, 1, 1, 3, 2, 5, 0],
    [2, 2, 2, 2, 0, 1, 4, 3],
    [3, 3, 3, 3, 5, 4, 1, 2],
    [4, 4, 4, 4, 2, 3, 0, 5],
    [5, 5, 5, 5, 1, 0, 3, 4],
];

/// Parent vertex whose midpoint with the anchor is the child anchor,
/// per Bey number.
pub const BEY_ID_TO_VERTEX: [u8; 8] = [0, 1, 2, 3, 1, 1, 2, 2];

/// Cube id of the child with Bey number `i` for a parent of a given type.
pub const PARENT_TYPE_BEY_TO_CUBE_ID: [[u8; 8]; 6] = [
    [0, 1, 5, 7, 1, 1, 5, 5],
    [0, 1, 3, 7, 1, 1, 3, 3],
    [0, 2, 3, 7, 2, 2, 3, 3],
    [0, 2, 6, 7, 2, 2, 6, 6],
    [0, 4, 6, 7, 4, 4, 6, 6],
    [0, 4, 5, 7, 4, 4, 5, 5],
];

/// Bey number of the child with local (TM) index `i`. The TM order sorts
/// children by cube id, ties broken by child type.
pub const PARENT_TYPE_LOCAL_INDEX_TO_BEY: [[u8; 8]; 6] = [
    [0, 1, 4, 5, 2, 7, 6, 3],
    [0, 1, 5, 4, 7, 2, 6, 3],
    [0, 4, 5, 1, 2, 7, 6, 3],
    [0, 1, 5, 4, 6, 7, 2, 3],
    [0, 4, 5, 1, 6, 2, 7, 3],
    [0, 5, 4, 1, 6, 7, 2, 3],
];

/// Cube id of the child with local (TM) index `i`.
pub const PARENT_TYPE_LOCAL_INDEX_TO_CUBE_ID: [[u8; 8]; 6] = [
    [0, 1, 1, 1, 5, 5, 5, 7],
    [0, 1, 1, 1, 3, 3, 3, 7],
    [0, 2, 2, 2, 3, 3, 3, 7],
    [0, 2, 2, 2, 6, 6, 6, 7],
    [0, 4, 4, 4, 6, 6, 6, 7],
    [0, 4, 4, 4, 5, 5, 5, 7],
];

/// Type of the child with local (TM) index `i`.
pub const PARENT_TYPE_LOCAL_INDEX_TO_TYPE: [[u8; 8]; 6] = [
    [0, 0, 4, 5, 0, 1, 2, 0],
    [1, 1, 2, 3, 0, 1, 5, 1],
    [2, 0, 1, 2, 2, 3, 4, 2],
    [3, 3, 4, 5, 1, 2, 3, 3],
    [4, 2, 3, 4, 0, 4, 5, 4],
    [5, 0, 1, 5, 3, 4, 5, 5],
];

/// Local (TM) index of a child from its own type and cube id.
pub const TYPE_CUBE_ID_TO_LOCAL_INDEX: [[u8; 8]; 6] = [
    [0, 1, 1, 4, 1, 4, 4, 7],
    [0, 1, 2, 5, 2, 5, 4, 7],
    [0, 2, 3, 4, 1, 6, 5, 7],
    [0, 3, 1, 5, 2, 4, 6, 7],
    [0, 2, 2, 6, 3, 5, 5, 7],
    [0, 3, 3, 6, 3, 6, 6, 7],
];

/// Representation of a tetrahedral key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TetKey {
    x: u32,
    y: u32,
    z: u32,
    level: u8,
    ty: u8,
}

impl TetKey {
    /// Build a key from anchor coordinates, level and type.
    pub fn new(x: u32, y: u32, z: u32, level: u8, ty: u8) -> Result<TetKey, SpatialError> {
        if level > MAX_REFINEMENT_LEVEL {
            return Err(SpatialError::InvalidArgument(format!(
                "level {} exceeds {}",
                level, MAX_REFINEMENT_LEVEL
            )));
        }
        if ty as usize >= TET_TYPES {
            return Err(SpatialError::InvalidArgument(format!(
                "tetrahedron type {} out of range",
                ty
            )));
        }
        let cell = 1u32 << (MAX_REFINEMENT_LEVEL - level) as u32;
        for &value in [x, y, z].iter() {
            if value >= LEVEL_SIZE {
                return Err(SpatialError::InvalidArgument(format!(
                    "anchor ({}, {}, {}) lies outside the domain",
                    x, y, z
                )));
            }
            if value % cell != 0 {
                return Err(SpatialError::InvalidArgument(format!(
                    "anchor ({}, {}, {}) is not aligned to level {}",
                    x, y, z, level
                )));
            }
        }
        Ok(TetKey { x, y, z, level, ty })
    }

    pub fn anchor(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Return the Kuhn-simplex type in `0..6`.
    pub fn tet_type(&self) -> u8 {
        self.ty
    }

    /// Edge length of the enclosing cube cell at the given level.
    pub fn edge_length(level: u8) -> PointType {
        (1u32 << (MAX_REFINEMENT_LEVEL - level) as u32) as PointType
    }

    fn cell_size(&self) -> u32 {
        1u32 << (MAX_REFINEMENT_LEVEL - self.level) as u32
    }

    /// Octant of this cell within its parent's cube, x the lowest bit.
    pub fn cube_id(&self) -> u8 {
        if self.level == 0 {
            return 0;
        }
        let h = self.cell_size();
        let mut cid = 0u8;
        if self.x & h != 0 {
            cid |= 1;
        }
        if self.y & h != 0 {
            cid |= 2;
        }
        if self.z & h != 0 {
            cid |= 4;
        }
        cid
    }

    /// Return the parent, or `None` for a root tetrahedron.
    pub fn parent(&self) -> Option<TetKey> {
        if self.level == 0 {
            return None;
        }
        let parent_cell = self.cell_size() << 1;
        let mask = !(parent_cell - 1);
        let cid = self.cube_id();
        Some(TetKey {
            x: self.x & mask,
            y: self.y & mask,
            z: self.z & mask,
            level: self.level - 1,
            ty: CUBE_ID_TYPE_TO_PARENT_TYPE[cid as usize][self.ty as usize],
        })
    }

    /// Return the child with local (TM) index `i`, or `None` on the
    /// deepest level.
    pub fn child(&self, i: u8) -> Option<TetKey> {
        if self.level >= MAX_REFINEMENT_LEVEL || i as usize >= CHILDREN_PER_TET {
            return None;
        }
        let h = self.cell_size() >> 1;
        let cid = PARENT_TYPE_LOCAL_INDEX_TO_CUBE_ID[self.ty as usize][i as usize];
        Some(TetKey {
            x: self.x + if cid & 1 != 0 { h } else { 0 },
            y: self.y + if cid & 2 != 0 { h } else { 0 },
            z: self.z + if cid & 4 != 0 { h } else { 0 },
            level: self.level + 1,
            ty: PARENT_TYPE_LOCAL_INDEX_TO_TYPE[self.ty as usize][i as usize],
        })
    }

    /// Return all children in local (TM) order.
    pub fn children(&self) -> Vec<TetKey> {
        (0..CHILDREN_PER_TET as u8)
            .filter_map(|i| self.child(i))
            .collect()
    }

    /// Return all children of the parent of the current key.
    pub fn siblings(&self) -> Vec<TetKey> {
        match self.parent() {
            Some(parent) => parent.children(),
            None => vec![*self],
        }
    }

    /// Local (TM) index of this cell within its parent.
    pub fn local_index(&self) -> u8 {
        TYPE_CUBE_ID_TO_LOCAL_INDEX[self.ty as usize][self.cube_id() as usize]
    }

    /// Bey number of this cell within its parent.
    pub fn bey_index(&self) -> u8 {
        match self.parent() {
            Some(parent) => {
                PARENT_TYPE_LOCAL_INDEX_TO_BEY[parent.ty as usize][self.local_index() as usize]
            }
            None => 0,
        }
    }

    /// Eight tetrahedra form a family iff they share a level and a parent
    /// and cover the Bey numbers 0..8 exactly once.
    pub fn is_family(keys: &[TetKey]) -> bool {
        if keys.len() != CHILDREN_PER_TET {
            return false;
        }
        let level = keys[0].level;
        if level == 0 {
            return false;
        }
        let parent = match keys[0].parent() {
            Some(parent) => parent,
            None => return false,
        };
        let mut seen = [false; 8];
        for key in keys.iter() {
            if key.level != level || key.parent() != Some(parent) {
                return false;
            }
            let bey = key.bey_index() as usize;
            if seen[bey] {
                return false;
            }
            seen[bey] = true;
        }
        seen.iter().all(|&covered| covered)
    }

    /// The TM-index: the 3-bit local indices concatenated along the
    /// root-to-cell path. This is the canonical total order within a level.
    pub fn tm_index(&self) -> u64 {
        // Types along the path, bottom-up.
        let mut types = [0u8; (MAX_REFINEMENT_LEVEL + 1) as usize];
        let mut current = *self;
        types[self.level as usize] = self.ty;
        while current.level > 0 {
            let parent = TetKey {
                x: current.x & !((current.cell_size() << 1) - 1),
                y: current.y & !((current.cell_size() << 1) - 1),
                z: current.z & !((current.cell_size() << 1) - 1),
                level: current.level - 1,
                ty: CUBE_ID_TYPE_TO_PARENT_TYPE[current.cube_id() as usize][current.ty as usize],
            };
            types[parent.level as usize] = parent.ty;
            current = parent;
        }

        let mut tm: u64 = 0;
        for walk_level in 1..=self.level {
            let shift = (MAX_REFINEMENT_LEVEL - walk_level) as u32;
            let mut cid = 0u8;
            if (self.x >> shift) & 1 != 0 {
                cid |= 1;
            }
            if (self.y >> shift) & 1 != 0 {
                cid |= 2;
            }
            if (self.z >> shift) & 1 != 0 {
                cid |= 4;
            }
            let local = TYPE_CUBE_ID_TO_LOCAL_INDEX[types[walk_level as usize] as usize][cid as usize];
            tm = (tm << 3) | local as u64;
        }
        tm
    }

    /// Type of the root tetrahedron this cell descends from.
    pub fn root_type(&self) -> u8 {
        let mut current = *self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.ty
    }

    /// Check if the key is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &TetKey) -> bool {
        if self.level >= other.level {
            return false;
        }
        let mut current = *other;
        while current.level > self.level {
            current = match current.parent() {
                Some(parent) => parent,
                None => return false,
            };
        }
        current == *self
    }

    /// The four corners of the tetrahedron.
    ///
    /// The vertex path runs from the anchor along axis `e_i`, then `e_j`,
    /// then the remaining axis, with `i = type / 2` and `j` determined by
    /// the type's parity.
    pub fn vertices(&self) -> [Coord; 4] {
        let h = self.cell_size() as PointType;
        let ei = (self.ty / 2) as usize;
        let ej = if self.ty % 2 == 0 {
            (ei + 2) % 3
        } else {
            (ei + 1) % 3
        };

        let anchor = [
            self.x as PointType,
            self.y as PointType,
            self.z as PointType,
        ];
        let mut v1 = anchor;
        v1[ei] += h;
        let mut v2 = v1;
        v2[ej] += h;
        let v3 = [anchor[0] + h, anchor[1] + h, anchor[2] + h];
        [anchor, v1, v2, v3]
    }

    pub fn tetrahedron(&self) -> Tetrahedron {
        Tetrahedron::new(self.vertices())
    }

    /// Bounds of the enclosing cube cell; the tetrahedron touches all six
    /// faces, so this is also the exact bounding box of the tetrahedron.
    pub fn cell_bounds(&self) -> Aabb {
        let h = self.cell_size() as PointType;
        let min = [
            self.x as PointType,
            self.y as PointType,
            self.z as PointType,
        ];
        Aabb {
            min,
            max: [min[0] + h, min[1] + h, min[2] + h],
        }
    }

    /// Boundary-inclusive containment test against the tetrahedron.
    pub fn contains_point(&self, point: &Coord) -> bool {
        self.tetrahedron().contains_point(point)
    }

    /// Return the key of the tetrahedron that encloses `point` at `level`.
    ///
    /// The cube cell is found by truncation and the Kuhn type by ordering
    /// the in-cell offsets; the produced tetrahedron always contains the
    /// producing point.
    pub fn enclosing(point: &Coord, level: u8) -> Result<TetKey, SpatialError> {
        if level > MAX_REFINEMENT_LEVEL {
            return Err(SpatialError::InvalidArgument(format!(
                "level {} exceeds {}",
                level, MAX_REFINEMENT_LEVEL
            )));
        }
        let grid = point_to_grid(point)?;
        let shift = (MAX_REFINEMENT_LEVEL - level) as u32;
        let mask = if shift == 0 { !0u32 } else { !((1 << shift) - 1) };
        let anchor = [grid[0] & mask, grid[1] & mask, grid[2] & mask];

        let dx = point[0] as f64 - anchor[0] as f64;
        let dy = point[1] as f64 - anchor[1] as f64;
        let dz = point[2] as f64 - anchor[2] as f64;

        let ty = if dx >= dy {
            if dy >= dz {
                1
            } else if dx >= dz {
                0
            } else {
                5
            }
        } else if dz >= dy {
            4
        } else if dz >= dx {
            3
        } else {
            2
        };

        Ok(TetKey {
            x: anchor[0],
            y: anchor[1],
            z: anchor[2],
            level,
            ty,
        })
    }

    /// Keys of all tetrahedra at `level` intersecting `bounds`.
    pub fn overlapping_keys(bounds: &Aabb, level: u8) -> Vec<TetKey> {
        let edge = TetKey::edge_length(level) as f64;
        let cells = 1u32 << level as u32;
        let clamp_cell = |value: PointType| -> u32 {
            let cell = (value as f64 / edge).floor();
            if cell < 0.0 {
                0
            } else if cell >= cells as f64 {
                cells - 1
            } else {
                cell as u32
            }
        };
        let lo = [
            clamp_cell(bounds.min[0]),
            clamp_cell(bounds.min[1]),
            clamp_cell(bounds.min[2]),
        ];
        let hi = [
            clamp_cell(bounds.max[0]),
            clamp_cell(bounds.max[1]),
            clamp_cell(bounds.max[2]),
        ];

        let shift = (MAX_REFINEMENT_LEVEL - level) as u32;
        let mut keys = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    for ty in 0..TET_TYPES as u8 {
                        let key = TetKey {
                            x: x << shift,
                            y: y << shift,
                            z: z << shift,
                            level,
                            ty,
                        };
                        if key.tetrahedron().intersects_aabb(bounds) {
                            keys.push(key);
                        }
                    }
                }
            }
        }
        keys.sort();
        keys
    }

    /// Compact two-word packing: anchor interleave in the first word,
    /// level and type in the second.
    pub fn to_packed(&self) -> [u64; 2] {
        let word0 = encode_grid(self.x, self.y, self.z);
        let word1 = self.level as u64 | ((self.ty as u64) << 5);
        [word0, word1]
    }

    pub fn from_packed(words: [u64; 2]) -> Result<TetKey, SpatialError> {
        let coords = decode_code(words[0]);
        let level = (words[1] & 0x1F) as u8;
        let ty = ((words[1] >> 5) & 0x7) as u8;
        TetKey::new(coords[0], coords[1], coords[2], level, ty)
    }

    /// Token preserving the `(level, root type, tm_index)` order in a
    /// single integer.
    pub(crate) fn sort_token(&self) -> u128 {
        ((self.level as u128) << 80) | ((self.root_type() as u128) << 72) | self.tm_index() as u128
    }
}

impl Ord for TetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.root_type().cmp(&other.root_type()))
            .then_with(|| self.tm_index().cmp(&other.tm_index()))
    }
}

impl PartialOrd for TetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::SeedableRng;

    use crate::constants::MAX_EXTENT;

    fn sample_keys() -> Vec<TetKey> {
        let mut keys = Vec::new();
        for ty in 0..TET_TYPES as u8 {
            keys.push(TetKey::new(0, 0, 0, 0, ty).unwrap());
            let cell = 1 << (MAX_REFINEMENT_LEVEL - 5);
            keys.push(TetKey::new(3 * cell, 7 * cell, cell, 5, ty).unwrap());
        }
        keys
    }

    /// Every local index must invert through the cube-id/type tables.
    #[test]
    fn test_connectivity_tables_are_consistent() {
        for parent_type in 0..TET_TYPES {
            for local in 0..CHILDREN_PER_TET {
                let child_type = PARENT_TYPE_LOCAL_INDEX_TO_TYPE[parent_type][local] as usize;
                let cid = PARENT_TYPE_LOCAL_INDEX_TO_CUBE_ID[parent_type][local] as usize;
                let bey = PARENT_TYPE_LOCAL_INDEX_TO_BEY[parent_type][local] as usize;

                assert_eq!(
                    TYPE_CUBE_ID_TO_LOCAL_INDEX[child_type][cid] as usize,
                    local
                );
                assert_eq!(
                    TYPE_TO_TYPE_OF_CHILD[parent_type][bey] as usize,
                    child_type
                );
                assert_eq!(PARENT_TYPE_BEY_TO_CUBE_ID[parent_type][bey] as usize, cid);
                assert_eq!(
                    CUBE_ID_TYPE_TO_PARENT_TYPE[cid][child_type] as usize,
                    parent_type
                );
            }
        }
    }

    /// TM order sorts children by cube id with type as tie break.
    #[test]
    fn test_local_order_is_cube_id_then_type() {
        for parent_type in 0..TET_TYPES {
            for local in 1..CHILDREN_PER_TET {
                let prev = (
                    PARENT_TYPE_LOCAL_INDEX_TO_CUBE_ID[parent_type][local - 1],
                    PARENT_TYPE_LOCAL_INDEX_TO_TYPE[parent_type][local - 1],
                );
                let next = (
                    PARENT_TYPE_LOCAL_INDEX_TO_CUBE_ID[parent_type][local],
                    PARENT_TYPE_LOCAL_INDEX_TO_TYPE[parent_type][local],
                );
                assert!(prev < next);
            }
        }
    }

    #[test]
    fn test_parent_child_roundtrip() {
        for key in sample_keys() {
            for i in 0..CHILDREN_PER_TET as u8 {
                let child = key.child(i).unwrap();
                assert_eq!(child.parent().unwrap(), key);
                assert_eq!(child.local_index(), i);
            }
        }
    }

    #[test]
    fn test_children_form_a_family() {
        for key in sample_keys() {
            let children = key.children();
            assert_eq!(children.len(), CHILDREN_PER_TET);
            assert!(TetKey::is_family(&children));
        }
    }

    #[test]
    fn test_broken_family_is_rejected() {
        let parent = TetKey::new(0, 0, 0, 3, 2).unwrap();
        let mut children = parent.children();

        // Replacing one member with a duplicate breaks Bey coverage.
        children[3] = children[4];
        assert!(!TetKey::is_family(&children));

        // Mixing in a child of another parent breaks parent equality.
        let other = TetKey::new(1 << (MAX_REFINEMENT_LEVEL - 3), 0, 0, 3, 2).unwrap();
        let mut children = parent.children();
        children[0] = other.children()[0];
        assert!(!TetKey::is_family(&children));
    }

    #[test]
    fn test_children_tile_parent() {
        for key in sample_keys() {
            let parent_tet = key.tetrahedron();
            let parent_volume = parent_tet.signed_volume6().abs();
            let mut child_volume_sum = 0.0;

            for child in key.children() {
                let tet = child.tetrahedron();
                assert!(parent_tet.contains_point(&tet.centroid()));
                child_volume_sum += tet.signed_volume6().abs();
            }
            assert!((child_volume_sum - parent_volume).abs() < 1e-3 * parent_volume);
        }
    }

    #[test]
    fn test_root_types_tile_the_cube() {
        let cube_volume = (MAX_EXTENT as f64).powi(3);
        let total: f64 = (0..TET_TYPES as u8)
            .map(|ty| {
                TetKey::new(0, 0, 0, 0, ty)
                    .unwrap()
                    .tetrahedron()
                    .signed_volume6()
                    .abs()
                    / 6.0
            })
            .sum();
        assert!((total - cube_volume).abs() < 1e-3 * cube_volume);
    }

    #[test]
    fn test_tm_index_extends_parent_path() {
        for key in sample_keys() {
            for i in 0..CHILDREN_PER_TET as u8 {
                let child = key.child(i).unwrap();
                assert_eq!(child.tm_index(), (key.tm_index() << 3) | i as u64);
            }
        }
    }

    #[test]
    fn test_ordering_is_level_major() {
        let coarse = TetKey::new(0, 0, 0, 2, 3).unwrap();
        let fine = TetKey::new(0, 0, 0, 3, 0).unwrap();
        assert!(coarse < fine);

        let a = TetKey::new(0, 0, 0, 1, 0).unwrap();
        let b = a.parent().unwrap().child(5).unwrap();
        assert!(a < b);
        assert!(a.sort_token() < b.sort_token());
    }

    #[test]
    fn test_enclosing_tet_contains_point() {
        let mut rng = StdRng::seed_from_u64(0);
        let between = rand::distributions::Uniform::from(0.0..MAX_EXTENT);

        for _ in 0..200 {
            let point = [
                between.sample(&mut rng),
                between.sample(&mut rng),
                between.sample(&mut rng),
            ];
            for level in [0u8, 1, 4, 9, 15] {
                let key = TetKey::enclosing(&point, level).unwrap();
                assert!(key.contains_point(&point));
                assert!(key.cell_bounds().contains_point(&point));
            }

            // Table-driven parents agree with direct location one level up.
            for level in [1u8, 4, 9, 15] {
                let key = TetKey::enclosing(&point, level).unwrap();
                let above = TetKey::enclosing(&point, level - 1).unwrap();
                assert_eq!(key.parent().unwrap(), above);
            }
        }
    }

    #[test]
    fn test_deep_point_location() {
        // A point on the unit grid at the deepest level.
        let key = TetKey::enclosing(&[1.0, 1.0, 1.0], MAX_REFINEMENT_LEVEL).unwrap();
        assert_eq!(key.level(), MAX_REFINEMENT_LEVEL);
        assert!(key.tet_type() < TET_TYPES as u8);
        assert!(key.contains_point(&[1.0, 1.0, 1.0]));

        // Its whole ancestor chain contains the point as well.
        let mut current = key;
        while let Some(parent) = current.parent() {
            assert!(parent.contains_point(&[1.0, 1.0, 1.0]));
            current = parent;
        }
    }

    #[test]
    fn test_enclosing_rejects_invalid_coordinates() {
        assert!(TetKey::enclosing(&[-1.0, 0.0, 0.0], 5).is_err());
        assert!(TetKey::enclosing(&[0.0, MAX_EXTENT, 0.0], 5).is_err());
    }

    #[test]
    fn test_root_vertices() {
        let root = TetKey::new(0, 0, 0, 0, 0).unwrap();
        let extent = MAX_EXTENT;
        assert_eq!(
            root.vertices(),
            [
                [0.0, 0.0, 0.0],
                [extent, 0.0, 0.0],
                [extent, 0.0, extent],
                [extent, extent, extent],
            ]
        );
    }

    #[test]
    fn test_packed_roundtrip() {
        for key in sample_keys() {
            assert_eq!(TetKey::from_packed(key.to_packed()).unwrap(), key);
        }
    }

    #[test]
    fn test_is_ancestor() {
        let key = TetKey::enclosing(&[77.0, 33.0, 11.0], 10).unwrap();
        let parent = key.parent().unwrap();
        assert!(parent.is_ancestor_of(&key));
        assert!(!key.is_ancestor_of(&parent));
        assert!(!key.is_ancestor_of(&key));
    }

    #[test]
    fn test_overlapping_keys_cover_a_box() {
        let edge = TetKey::edge_length(8);
        let bounds = Aabb::from_center_half_extent([5.0 * edge, 5.0 * edge, 5.0 * edge], 2.0).unwrap();
        let keys = TetKey::overlapping_keys(&bounds, 8);

        // The box sits on a cube corner, so tets from all 8 cubes show up.
        assert!(!keys.is_empty());
        for key in keys.iter() {
            assert!(key.cell_bounds().intersects(&bounds));
        }

        // Every enclosing tet of a point inside the box is in the set.
        let probe = [5.0 * edge + 1.0, 5.0 * edge + 0.5, 5.0 * edge + 0.25];
        let enclosing = TetKey::enclosing(&probe, 8).unwrap();
        assert!(keys.contains(&enclosing));
    }
}
