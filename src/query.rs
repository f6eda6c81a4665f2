//! Query kernel: k-nearest-neighbor, range, ray, frustum, sphere, plane,
//! convex-hull, proximity and collision queries.
//!
//! Every query follows the same skeleton: bound the query shape with a
//! box, walk the sorted key set (a key subrange where the flavor has one,
//! a filtered level scan otherwise), then refine per cell and per entity.
//! Queries read key snapshots and are weakly consistent under concurrent
//! mutation; entity ids replicated by spanning are deduplicated.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::constants::GEOMETRIC_TOLERANCE;
use crate::error::SpatialError;
use crate::geometry::{
    self, ray_aabb, ray_aabb_entry_normal, Aabb, Containment, Frustum, Plane3, Ray3, Sphere,
    Tetrahedron,
};
use crate::index::SpatialIndex;
use crate::key::SpatialKey;
use crate::types::{Coord, EntityId, PointType};

/// A node surfaced by a range query.
#[derive(Clone, Debug)]
pub struct SpatialNode<K> {
    pub key: K,
    pub entity_ids: Vec<EntityId>,
}

/// One ray intersection, ordered by distance along the ray.
#[derive(Clone, Debug)]
pub struct RayHit<C> {
    pub id: EntityId,
    pub content: C,
    pub distance: PointType,
    pub point: Coord,
    pub normal: Coord,
    pub bounds: Option<Aabb>,
}

/// One colliding pair, deduplicated by `id1 < id2` and ordered by
/// descending penetration depth.
#[derive(Clone, Debug)]
pub struct CollisionPair<C> {
    pub id1: EntityId,
    pub id2: EntityId,
    pub content1: C,
    pub content2: C,
    pub bounds1: Option<Aabb>,
    pub bounds2: Option<Aabb>,
    pub contact_point: Coord,
    pub contact_normal: Coord,
    pub penetration_depth: PointType,
}

/// Query volume accepted by the range queries. Spheres and tetrahedra
/// prune through their enclosing box first.
#[derive(Clone, Copy, Debug)]
pub enum Volume {
    Aabb(Aabb),
    Sphere(Sphere),
    Tetrahedron(Tetrahedron),
}

impl Volume {
    pub fn aabb(&self) -> Aabb {
        match self {
            Volume::Aabb(aabb) => *aabb,
            Volume::Sphere(sphere) => sphere.aabb(),
            Volume::Tetrahedron(tet) => tet.aabb(),
        }
    }

    pub fn contains_point(&self, point: &Coord) -> bool {
        match self {
            Volume::Aabb(aabb) => aabb.contains_point(point),
            Volume::Sphere(sphere) => sphere.contains_point(point),
            Volume::Tetrahedron(tet) => tet.contains_point(point),
        }
    }

    /// The cell is wholly inside the volume.
    pub fn contains_aabb(&self, cell: &Aabb) -> bool {
        match self {
            Volume::Aabb(aabb) => aabb.contains_aabb(cell),
            Volume::Sphere(sphere) => sphere.contains_aabb(cell),
            Volume::Tetrahedron(tet) => {
                cell.corners().iter().all(|corner| tet.contains_point(corner))
            }
        }
    }

    /// The cell intersects the volume.
    pub fn intersects_aabb(&self, cell: &Aabb) -> bool {
        match self {
            Volume::Aabb(aabb) => aabb.intersects(cell),
            Volume::Sphere(sphere) => cell.intersects_sphere(sphere),
            Volume::Tetrahedron(tet) => tet.intersects_aabb(cell),
        }
    }
}

impl From<Aabb> for Volume {
    fn from(aabb: Aabb) -> Volume {
        Volume::Aabb(aabb)
    }
}

impl From<Sphere> for Volume {
    fn from(sphere: Sphere) -> Volume {
        Volume::Sphere(sphere)
    }
}

impl From<Tetrahedron> for Volume {
    fn from(tet: Tetrahedron) -> Volume {
        Volume::Tetrahedron(tet)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegionMode {
    /// Cells intersecting the volume.
    Bounding,
    /// Cells wholly inside the volume.
    BoundedBy,
}

/// Restartable lazy walk over the nodes matching a region query.
///
/// The key set is snapshotted at construction; the per-cell predicate and
/// node reads run lazily on `next`.
pub struct RegionIter<'a, K: SpatialKey, C: Clone + Send + Sync> {
    index: &'a SpatialIndex<K, C>,
    keys: std::vec::IntoIter<K>,
    volume: Volume,
    mode: RegionMode,
}

impl<'a, K: SpatialKey, C: Clone + Send + Sync> Iterator for RegionIter<'a, K, C> {
    type Item = SpatialNode<K>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.keys.next()?;
            let cell = key.cell_bounds();
            let accept = match self.mode {
                RegionMode::Bounding => self.volume.intersects_aabb(&cell),
                RegionMode::BoundedBy => self.volume.contains_aabb(&cell),
            };
            if !accept {
                continue;
            }
            if let Some(node) = self.index.nodes.get(&key) {
                return Some(SpatialNode {
                    key,
                    entity_ids: node.entities(),
                });
            }
        }
    }
}

/// `f64` sort key ordered by `total_cmp`, with the entity id as tie break.
#[derive(Clone, Copy, Debug)]
struct RankedId {
    rank: f64,
    id: EntityId,
}

impl PartialEq for RankedId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedId {}

impl Ord for RankedId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .total_cmp(&other.rank)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for RankedId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug)]
struct RankedKey<K> {
    rank: f64,
    key: K,
}

impl<K: SpatialKey> PartialEq for RankedKey<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: SpatialKey> Eq for RankedKey<K> {}

impl<K: SpatialKey> Ord for RankedKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .total_cmp(&other.rank)
            .then(self.key.cmp(&other.key))
    }
}

impl<K: SpatialKey> PartialOrd for RankedKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: SpatialKey, C: Clone + Send + Sync> SpatialIndex<K, C> {
    /// Keys of populated nodes whose cells can overlap `bounds`, using
    /// the SFC subrange where the key flavor provides one.
    fn candidate_keys(&self, bounds: &Aabb) -> Vec<K> {
        let mut keys = Vec::new();
        for level in self.nodes.levels() {
            match K::range_hint(bounds, level) {
                Some((lo, hi)) => keys.extend(self.nodes.subrange(&lo, &hi)),
                None => keys.extend(
                    self.nodes
                        .keys_at_level(level)
                        .into_iter()
                        .filter(|key| key.cell_bounds().intersects(bounds)),
                ),
            }
        }
        keys
    }

    /// Ids of entities inside the region: positions for point entities,
    /// bounds overlap for bounded entities.
    pub fn entities_in_region(&self, region: &Aabb) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for key in self.candidate_keys(region) {
            if !key.cell_bounds().intersects(region) {
                continue;
            }
            let entities = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            for id in entities {
                if seen.contains(&id) {
                    continue;
                }
                let matches = match self.entities.placement(id) {
                    Some((_, Some(bounds))) => bounds.intersects(region),
                    Some((position, None)) => region.contains_point(&position),
                    None => false,
                };
                if matches {
                    seen.insert(id);
                    ids.push(id);
                }
            }
        }
        ids.sort();
        ids
    }

    /// Lazy sequence of nodes whose cells intersect the volume.
    pub fn bounding(&self, volume: impl Into<Volume>) -> RegionIter<'_, K, C> {
        let volume = volume.into();
        RegionIter {
            keys: self.candidate_keys(&volume.aabb()).into_iter(),
            index: self,
            volume,
            mode: RegionMode::Bounding,
        }
    }

    /// Lazy sequence of nodes whose cells lie wholly inside the volume.
    pub fn bounded_by(&self, volume: impl Into<Volume>) -> RegionIter<'_, K, C> {
        let volume = volume.into();
        RegionIter {
            keys: self.candidate_keys(&volume.aabb()).into_iter(),
            index: self,
            volume,
            mode: RegionMode::BoundedBy,
        }
    }

    /// The node at the cell enclosing `position` at `level`, if populated.
    pub fn enclosing_point(
        &self,
        position: &Coord,
        level: u8,
    ) -> Result<Option<SpatialNode<K>>, SpatialError> {
        let key = K::enclosing(position, level)?;
        Ok(self.nodes.get(&key).map(|node| SpatialNode {
            key,
            entity_ids: node.entities(),
        }))
    }

    /// The deepest populated node whose cell contains the whole volume.
    pub fn enclosing_volume(&self, volume: impl Into<Volume>) -> Option<SpatialNode<K>> {
        let aabb = volume.into().aabb();
        let mut level = self.nodes.max_level();
        loop {
            if let Ok(key) = K::enclosing(&aabb.min, level) {
                if key.cell_bounds().contains_aabb(&aabb) {
                    if let Some(node) = self.nodes.get(&key) {
                        return Some(SpatialNode {
                            key,
                            entity_ids: node.entities(),
                        });
                    }
                }
            }
            if level == 0 {
                return None;
            }
            level -= 1;
        }
    }

    /// Up to `k` entity ids ascending by distance from `query`, ties
    /// broken by id. Nodes are visited best-first by cell distance and
    /// the walk stops once no unexplored cell can beat the current k-th.
    pub fn k_nearest_neighbors(
        &self,
        query: &Coord,
        k: usize,
        max_distance: Option<PointType>,
    ) -> Vec<EntityId> {
        if k == 0 {
            return Vec::new();
        }
        let limit = max_distance.map(|d| d as f64);

        let mut frontier = BinaryHeap::new();
        for key in self.nodes.keys() {
            let rank = key.min_distance_squared(query).sqrt();
            if limit.map_or(false, |limit| rank > limit) {
                continue;
            }
            frontier.push(std::cmp::Reverse(RankedKey { rank, key }));
        }

        let mut best: BinaryHeap<RankedId> = BinaryHeap::new();
        let mut seen = HashSet::new();
        while let Some(std::cmp::Reverse(cell)) = frontier.pop() {
            if best.len() == k {
                if let Some(worst) = best.peek() {
                    if cell.rank > worst.rank {
                        break;
                    }
                }
            }
            let entities = self
                .nodes
                .with_node(&cell.key, |node| node.entities())
                .unwrap_or_default();
            for id in entities {
                if !seen.insert(id) {
                    continue;
                }
                let position = match self.entities.position(id) {
                    Some(position) => position,
                    None => continue,
                };
                let rank = geometry::distance(&position, query);
                if limit.map_or(false, |limit| rank > limit) {
                    continue;
                }
                let candidate = RankedId { rank, id };
                if best.len() < k {
                    best.push(candidate);
                } else if let Some(worst) = best.peek() {
                    if candidate < *worst {
                        best.pop();
                        best.push(candidate);
                    }
                }
            }
        }

        best.into_sorted_vec().into_iter().map(|entry| entry.id).collect()
    }

    fn ray_candidates(&self, ray: &Ray3) -> Vec<(f64, K)> {
        let mut cells = Vec::new();
        for key in self.nodes.keys() {
            if let Some((t_enter, _)) = ray_aabb(ray, &key.cell_bounds()) {
                cells.push((t_enter.max(0.0), key));
            }
        }
        cells.sort_by(|a, b| a.0.total_cmp(&b.0));
        cells
    }

    fn ray_hit(&self, ray: &Ray3, id: EntityId) -> Option<RayHit<C>> {
        let (position, bounds) = self.entities.placement(id)?;
        let content = self.entities.content(id)?;
        match bounds {
            Some(bounds) => {
                let (t_enter, _) = ray_aabb(ray, &bounds)?;
                let distance = t_enter.max(0.0);
                Some(RayHit {
                    id,
                    content,
                    distance: distance as PointType,
                    point: ray.point_at(distance),
                    normal: ray_aabb_entry_normal(ray, &bounds, t_enter),
                    bounds: Some(bounds),
                })
            }
            None => {
                let (t, gap) = ray.closest_approach(&position);
                if gap > GEOMETRIC_TOLERANCE {
                    return None;
                }
                Some(RayHit {
                    id,
                    content,
                    distance: t as PointType,
                    point: position,
                    normal: [-ray.direction[0], -ray.direction[1], -ray.direction[2]],
                    bounds: None,
                })
            }
        }
    }

    /// All ray intersections ascending by distance.
    pub fn ray_intersect_all(&self, ray: &Ray3) -> Vec<RayHit<C>> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (_, key) in self.ray_candidates(ray) {
            let entities = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            for id in entities {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(hit) = self.ray_hit(ray, id) {
                    hits.push(hit);
                }
            }
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.id.cmp(&b.id))
        });
        hits
    }

    /// Nearest ray intersection; stops as soon as no remaining cell can
    /// beat the best hit.
    pub fn ray_intersect_first(&self, ray: &Ray3) -> Option<RayHit<C>> {
        let mut seen = HashSet::new();
        let mut best: Option<RayHit<C>> = None;
        for (t_enter, key) in self.ray_candidates(ray) {
            if let Some(ref hit) = best {
                if t_enter > hit.distance as f64 {
                    break;
                }
            }
            let entities = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            for id in entities {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(hit) = self.ray_hit(ray, id) {
                    let better = match best {
                        Some(ref current) => {
                            (hit.distance, hit.id) < (current.distance, current.id)
                        }
                        None => true,
                    };
                    if better {
                        best = Some(hit);
                    }
                }
            }
        }
        best
    }

    /// Ray intersections within `max_distance`, ascending by distance.
    pub fn ray_intersect_within(&self, ray: &Ray3, max_distance: PointType) -> Vec<RayHit<C>> {
        let mut hits = self.ray_intersect_all(ray);
        hits.retain(|hit| hit.distance <= max_distance);
        hits
    }

    /// Ids of entities visible in the frustum. Cells fully inside yield
    /// without per-entity tests; intersecting cells refine per entity.
    pub fn frustum_cull_visible(&self, frustum: &Frustum) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        let mut visible = Vec::new();
        for (key, node) in self.nodes.in_order() {
            match frustum.classify_aabb(&key.cell_bounds()) {
                Containment::Outside => continue,
                Containment::Inside => {
                    for id in node.entities() {
                        if seen.insert(id) {
                            visible.push(id);
                        }
                    }
                }
                Containment::Intersecting => {
                    for id in node.entities() {
                        if seen.contains(&id) {
                            continue;
                        }
                        let inside = match self.entities.placement(id) {
                            Some((_, Some(bounds))) => frustum.intersects_aabb(&bounds),
                            Some((position, None)) => frustum.contains_point(&position),
                            None => false,
                        };
                        if inside {
                            seen.insert(id);
                            visible.push(id);
                        }
                    }
                }
            }
        }
        visible.sort();
        visible
    }

    /// Ids of entities touching the sphere, ascending by center distance.
    pub fn entities_intersecting_sphere(&self, sphere: &Sphere) -> Vec<EntityId> {
        let mut ranked = Vec::new();
        let mut seen = HashSet::new();
        for key in self.candidate_keys(&sphere.aabb()) {
            if !key.cell_bounds().intersects_sphere(sphere) {
                continue;
            }
            let entities = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            for id in entities {
                if !seen.insert(id) {
                    continue;
                }
                let (position, bounds) = match self.entities.placement(id) {
                    Some(placement) => placement,
                    None => continue,
                };
                let touches = match bounds {
                    Some(bounds) => bounds.intersects_sphere(sphere),
                    None => sphere.contains_point(&position),
                };
                if touches {
                    ranked.push(RankedId {
                        rank: geometry::distance(&position, &sphere.center),
                        id,
                    });
                }
            }
        }
        ranked.sort();
        ranked.into_iter().map(|entry| entry.id).collect()
    }

    /// Ids of entities cut by the plane, ascending by signed distance of
    /// their positions.
    pub fn entities_intersecting_plane(&self, plane: &Plane3) -> Vec<EntityId> {
        let mut ranked = Vec::new();
        let mut seen = HashSet::new();
        for (key, node) in self.nodes.in_order() {
            if plane.classify_aabb(&key.cell_bounds()) != 0 {
                continue;
            }
            for id in node.entities() {
                if !seen.insert(id) {
                    continue;
                }
                let (position, bounds) = match self.entities.placement(id) {
                    Some(placement) => placement,
                    None => continue,
                };
                let cut = match bounds {
                    Some(bounds) => plane.classify_aabb(&bounds) == 0,
                    None => plane.signed_distance(&position).abs() <= GEOMETRIC_TOLERANCE,
                };
                if cut {
                    ranked.push(RankedId {
                        rank: plane.signed_distance(&position),
                        id,
                    });
                }
            }
        }
        ranked.sort();
        ranked.into_iter().map(|entry| entry.id).collect()
    }

    /// Ids of entities inside the convex hull given as interior-side
    /// planes, ordered by descending penetration depth.
    pub fn entities_in_hull(&self, planes: &[Plane3]) -> Vec<EntityId> {
        let outside_cell = |cell: &Aabb| planes.iter().any(|plane| plane.classify_aabb(cell) == 1);

        let mut ranked = Vec::new();
        let mut seen = HashSet::new();
        for (key, node) in self.nodes.in_order() {
            if outside_cell(&key.cell_bounds()) {
                continue;
            }
            for id in node.entities() {
                if !seen.insert(id) {
                    continue;
                }
                let (position, bounds) = match self.entities.placement(id) {
                    Some(placement) => placement,
                    None => continue,
                };
                let inside = match bounds {
                    Some(bounds) => !outside_cell(&bounds),
                    None => planes
                        .iter()
                        .all(|plane| plane.signed_distance(&position) <= GEOMETRIC_TOLERANCE),
                };
                if inside {
                    // Depth: distance to the nearest hull face.
                    let depth = planes
                        .iter()
                        .map(|plane| -plane.signed_distance(&position))
                        .fold(f64::INFINITY, f64::min);
                    ranked.push(RankedId { rank: -depth, id });
                }
            }
        }
        ranked.sort();
        ranked.into_iter().map(|entry| entry.id).collect()
    }

    /// `(id, distance)` pairs of entities within `radius` of `query`,
    /// ascending by distance.
    pub fn neighbors_within(&self, query: &Coord, radius: PointType) -> Vec<(EntityId, PointType)> {
        let sphere = Sphere {
            center: *query,
            radius,
        };
        self.entities_intersecting_sphere(&sphere)
            .into_iter()
            .filter_map(|id| {
                self.entities
                    .position(id)
                    .map(|position| (id, geometry::distance(&position, query) as PointType))
            })
            .collect()
    }

    fn collision_between(&self, a: EntityId, b: EntityId) -> Option<CollisionPair<C>> {
        let (id1, id2) = if a < b { (a, b) } else { (b, a) };
        let (position1, bounds1) = self.entities.placement(id1)?;
        let (position2, bounds2) = self.entities.placement(id2)?;

        let (contact_point, contact_normal, penetration_depth) = match (bounds1, bounds2) {
            (Some(b1), Some(b2)) => {
                let overlap = b1.intersection(&b2)?;
                let extent = overlap.extent();
                let mut axis = 0;
                for candidate in 1..3 {
                    if extent[candidate] < extent[axis] {
                        axis = candidate;
                    }
                }
                let mut normal = [0.0; 3];
                normal[axis] = if b1.center()[axis] <= b2.center()[axis] {
                    1.0
                } else {
                    -1.0
                };
                (overlap.center(), normal, extent[axis])
            }
            (Some(bounds), None) | (None, Some(bounds)) => {
                let point = if bounds1.is_some() { position2 } else { position1 };
                if !bounds.contains_point(&point) {
                    return None;
                }
                let mut axis = 0;
                let mut depth = PointType::INFINITY;
                let mut sign = 1.0;
                for candidate in 0..3 {
                    let to_min = point[candidate] - bounds.min[candidate];
                    let to_max = bounds.max[candidate] - point[candidate];
                    if to_min < depth {
                        depth = to_min;
                        axis = candidate;
                        sign = -1.0;
                    }
                    if to_max < depth {
                        depth = to_max;
                        axis = candidate;
                        sign = 1.0;
                    }
                }
                let mut normal = [0.0; 3];
                normal[axis] = sign;
                (point, normal, depth)
            }
            (None, None) => {
                if geometry::distance(&position1, &position2) > 2.0 * GEOMETRIC_TOLERANCE {
                    return None;
                }
                (position1, [0.0, 0.0, 1.0], 0.0)
            }
        };

        Some(CollisionPair {
            id1,
            id2,
            content1: self.entities.content(id1)?,
            content2: self.entities.content(id2)?,
            bounds1,
            bounds2,
            contact_point,
            contact_normal,
            penetration_depth,
        })
    }

    fn sort_collisions(pairs: &mut Vec<CollisionPair<C>>) {
        pairs.sort_by(|a, b| {
            b.penetration_depth
                .total_cmp(&a.penetration_depth)
                .then(a.id1.cmp(&b.id1))
                .then(a.id2.cmp(&b.id2))
        });
    }

    /// Every colliding pair sharing a node, pairwise-tested and ordered
    /// by descending penetration depth.
    pub fn find_all_collisions(&self) -> Vec<CollisionPair<C>> {
        let mut tested = HashSet::new();
        let mut pairs = Vec::new();
        for (_, node) in self.nodes.in_order() {
            let ids = node.entities();
            if ids.len() < 2 {
                continue;
            }
            for (first, &a) in ids.iter().enumerate() {
                for &b in ids.iter().skip(first + 1) {
                    if !tested.insert((a.min(b), a.max(b))) {
                        continue;
                    }
                    if let Some(pair) = self.collision_between(a, b) {
                        pairs.push(pair);
                    }
                }
            }
        }
        Self::sort_collisions(&mut pairs);
        pairs
    }

    /// Collisions of one entity against every peer in its nodes.
    pub fn find_collisions(&self, id: EntityId) -> Vec<CollisionPair<C>> {
        let locations = match self.entities.locations(id) {
            Some(locations) => locations,
            None => return Vec::new(),
        };
        let mut peers = HashSet::new();
        for key in locations {
            let entities = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            peers.extend(entities);
        }
        peers.remove(&id);

        let mut pairs: Vec<CollisionPair<C>> = peers
            .into_iter()
            .filter_map(|peer| self.collision_between(id, peer))
            .collect();
        Self::sort_collisions(&mut pairs);
        pairs
    }

    /// Collisions restricted to nodes whose cells intersect `region`.
    pub fn find_collisions_in_region(&self, region: &Aabb) -> Vec<CollisionPair<C>> {
        let mut tested = HashSet::new();
        let mut pairs = Vec::new();
        for key in self.candidate_keys(region) {
            if !key.cell_bounds().intersects(region) {
                continue;
            }
            let ids = self
                .nodes
                .with_node(&key, |node| node.entities())
                .unwrap_or_default();
            if ids.len() < 2 {
                continue;
            }
            for (first, &a) in ids.iter().enumerate() {
                for &b in ids.iter().skip(first + 1) {
                    if !tested.insert((a.min(b), a.max(b))) {
                        continue;
                    }
                    if let Some(pair) = self.collision_between(a, b) {
                        pairs.push(pair);
                    }
                }
            }
        }
        Self::sort_collisions(&mut pairs);
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::prelude::*;
    use rand::SeedableRng;

    use crate::index::Octree;
    use crate::types::IndexConfig;

    fn octree() -> Octree<usize> {
        Octree::new(IndexConfig::default()).unwrap()
    }

    /// 10x10x10 grid with spacing 100 starting at (500, 500, 500).
    fn grid_octree() -> (Octree<usize>, Vec<Coord>) {
        let index = octree();
        let mut positions = Vec::new();
        for x in 0..10 {
            for y in 0..10 {
                for z in 0..10 {
                    let position = [
                        500.0 + 100.0 * x as f32,
                        500.0 + 100.0 * y as f32,
                        500.0 + 100.0 * z as f32,
                    ];
                    index.insert(position, 12, positions.len()).unwrap();
                    positions.push(position);
                }
            }
        }
        (index, positions)
    }

    #[test]
    fn test_knn_finds_surrounding_cube() {
        let (index, positions) = grid_octree();
        let query = [550.0, 550.0, 550.0];
        let ids = index.k_nearest_neighbors(&query, 8, None);
        assert_eq!(ids.len(), 8);

        let expected = 50.0 * (3.0f64).sqrt();
        for id in ids {
            let position = index.get_position(id).unwrap();
            let distance = geometry::distance(&position, &query);
            assert!((distance - expected).abs() < 1e-3);
            // The hits are the corners (500|600)^3.
            for axis in 0..3 {
                assert!(position[axis] == 500.0 || position[axis] == 600.0);
            }
        }
        // Sanity: all grid points were indexed.
        assert_eq!(positions.len(), 1000);
    }

    #[test]
    fn test_knn_distances_are_nondecreasing() {
        let (index, _) = grid_octree();
        let query = [700.0, 800.0, 900.0];
        let ids = index.k_nearest_neighbors(&query, 20, None);
        assert_eq!(ids.len(), 20);

        let mut last = 0.0;
        for id in ids {
            let distance = geometry::distance(&index.get_position(id).unwrap(), &query);
            assert!(distance >= last);
            last = distance;
        }
    }

    #[test]
    fn test_knn_respects_max_distance_and_population() {
        let (index, _) = grid_octree();
        let query = [500.0, 500.0, 500.0];

        // Radius 100 covers the corner point itself plus its 3 axis
        // neighbors at distance 100.
        let ids = index.k_nearest_neighbors(&query, 100, Some(100.0));
        assert_eq!(ids.len(), 4);

        // More requested than stored.
        let ids = index.k_nearest_neighbors(&query, 5000, None);
        assert_eq!(ids.len(), 1000);

        assert!(index.k_nearest_neighbors(&query, 0, None).is_empty());
    }

    #[test]
    fn test_knn_breaks_ties_by_id() {
        let index = octree();
        let a = index.insert([100.0, 200.0, 300.0], 10, 0).unwrap();
        let b = index.insert([100.0, 200.0, 300.0], 10, 1).unwrap();
        assert!(a < b);

        let ids = index.k_nearest_neighbors(&[100.0, 200.0, 300.0], 1, None);
        assert_eq!(ids, vec![a]);
    }

    #[test]
    fn test_region_query_matches_brute_force() {
        let index = octree();
        let mut rng = StdRng::seed_from_u64(42);
        let between = rand::distributions::Uniform::from(0.0..10000.0);
        let mut inserted = Vec::new();
        for i in 0..500 {
            let position = [
                between.sample(&mut rng),
                between.sample(&mut rng),
                between.sample(&mut rng),
            ];
            inserted.push((index.insert(position, 10, i).unwrap(), position));
        }

        let region = Aabb::new([2000.0, 2000.0, 2000.0], [7000.0, 7000.0, 7000.0]).unwrap();
        let mut expected: Vec<EntityId> = inserted
            .iter()
            .filter(|(_, position)| region.contains_point(position))
            .map(|(id, _)| *id)
            .collect();
        expected.sort();

        assert_eq!(index.entities_in_region(&region), expected);
    }

    #[test]
    fn test_bounding_and_bounded_by() {
        let index = octree();
        let edge = crate::morton::MortonKey::edge_length(10);
        // One entity inside the region, one neighboring cell crossing it.
        index.insert([1.5 * edge, 0.5 * edge, 0.5 * edge], 10, 0).unwrap();
        index.insert([0.5 * edge, 0.5 * edge, 0.5 * edge], 10, 1).unwrap();

        let region = Aabb::new([edge, 0.0, 0.0], [2.0 * edge, edge, edge]).unwrap();
        let bounding: Vec<_> = index.bounding(region).collect();
        let bounded: Vec<_> = index.bounded_by(region).collect();

        // The fully-covered cell shows up in both; the cell that merely
        // touches the region boundary only in `bounding`.
        assert_eq!(bounded.len(), 1);
        assert!(bounding.len() >= bounded.len());

        // Restartable: a second iteration yields the same nodes.
        let again: Vec<_> = index.bounding(region).collect();
        assert_eq!(again.len(), bounding.len());
    }

    #[test]
    fn test_sphere_volume_delegates_to_aabb_pruning() {
        let (index, positions) = grid_octree();
        let sphere = Sphere::new([950.0, 950.0, 950.0], 120.0).unwrap();
        let ids = index.entities_intersecting_sphere(&sphere);
        assert!(!ids.is_empty());
        for id in ids.iter() {
            let position = index.get_position(*id).unwrap();
            assert!(geometry::distance(&position, &sphere.center) <= 120.0 + 1e-6);
        }
        // Brute force agreement.
        let expected = positions
            .iter()
            .filter(|p| geometry::distance(p, &sphere.center) <= 120.0)
            .count();
        assert_eq!(ids.len(), expected);
    }

    #[test]
    fn test_ray_hits_bounded_entity() {
        let index = octree();
        let bounds = Aabb::from_center_half_extent([1000.0, 1000.0, 1000.0], 10.0).unwrap();
        let id = index
            .insert_with_bounds([1000.0, 1000.0, 1000.0], 8, 7, bounds)
            .unwrap();

        let ray = Ray3::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]).unwrap();
        let first = index.ray_intersect_first(&ray).unwrap();
        assert_eq!(first.id, id);

        // The slab test enters the box at 990 * sqrt(3) along the
        // diagonal.
        let expected = 990.0 * (3.0f64).sqrt();
        assert!((first.distance as f64 - expected).abs() < 1e-2);

        let all = index.ray_intersect_all(&ray);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].distance, first.distance);

        // A ray pointing away misses.
        let away = Ray3::new([0.0, 0.0, 0.0], [-1.0, -1.0, -1.0]).unwrap();
        assert!(index.ray_intersect_first(&away).is_none());
    }

    #[test]
    fn test_ray_ordering_and_within() {
        let index = octree();
        for i in 1..=5u32 {
            let center = [1000.0 * i as f32, 500.0, 500.0];
            let bounds = Aabb::from_center_half_extent(center, 20.0).unwrap();
            index.insert_with_bounds(center, 8, i as usize, bounds).unwrap();
        }

        let ray = Ray3::new([0.0, 500.0, 500.0], [1.0, 0.0, 0.0]).unwrap();
        let all = index.ray_intersect_all(&ray);
        assert_eq!(all.len(), 5);
        assert!(all
            .iter()
            .tuple_windows()
            .all(|(near, far)| near.distance <= far.distance));
        // First equals the head of the full ordering.
        let first = index.ray_intersect_first(&ray).unwrap();
        assert_eq!(first.id, all[0].id);

        let near = index.ray_intersect_within(&ray, 2500.0);
        assert_eq!(near.len(), 2);
    }

    #[test]
    fn test_frustum_culling() {
        let index = octree();
        let inside = index.insert([500.0, 500.0, 5000.0], 10, 0).unwrap();
        let behind = index.insert([500.0, 500.0, 100.0], 10, 1).unwrap();
        let beside = index.insert([200000.0, 500.0, 5000.0], 10, 2).unwrap();

        let frustum = Frustum::orthographic(
            [500.0, 500.0, 200.0],
            [500.0, 500.0, 10000.0],
            [0.0, 1.0, 0.0],
            2000.0,
            2000.0,
            100.0,
            20000.0,
        )
        .unwrap();

        let visible = index.frustum_cull_visible(&frustum);
        assert!(visible.contains(&inside));
        assert!(!visible.contains(&behind));
        assert!(!visible.contains(&beside));
    }

    #[test]
    fn test_plane_and_hull_queries() {
        let index = octree();
        let on_plane = index
            .insert_with_bounds(
                [1000.0, 1000.0, 1000.0],
                10,
                0,
                Aabb::from_center_half_extent([1000.0, 1000.0, 1000.0], 50.0).unwrap(),
            )
            .unwrap();
        let far_away = index.insert([1000.0, 1000.0, 100000.0], 10, 1).unwrap();

        let plane = Plane3::from_point_normal([0.0, 0.0, 1010.0], [0.0, 0.0, 1.0]).unwrap();
        let cut = index.entities_intersecting_plane(&plane);
        assert!(cut.contains(&on_plane));
        assert!(!cut.contains(&far_away));

        // A box hull around the first entity.
        let hull = [
            Plane3::from_point_normal([900.0, 0.0, 0.0], [-1.0, 0.0, 0.0]).unwrap(),
            Plane3::from_point_normal([1100.0, 0.0, 0.0], [1.0, 0.0, 0.0]).unwrap(),
            Plane3::from_point_normal([0.0, 900.0, 0.0], [0.0, -1.0, 0.0]).unwrap(),
            Plane3::from_point_normal([0.0, 1100.0, 0.0], [0.0, 1.0, 0.0]).unwrap(),
            Plane3::from_point_normal([0.0, 0.0, 900.0], [0.0, 0.0, -1.0]).unwrap(),
            Plane3::from_point_normal([0.0, 0.0, 1100.0], [0.0, 0.0, 1.0]).unwrap(),
        ];
        let contained = index.entities_in_hull(&hull);
        assert!(contained.contains(&on_plane));
        assert!(!contained.contains(&far_away));
    }

    #[test]
    fn test_proximity_query() {
        let (index, _) = grid_octree();
        let neighbors = index.neighbors_within(&[550.0, 550.0, 550.0], 90.0);
        assert_eq!(neighbors.len(), 8);
        for pair in neighbors.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_collisions_are_deduplicated_and_sorted() {
        let config = IndexConfig {
            min_span_threshold: 0.0,
            ..IndexConfig::default()
        };
        let index: Octree<usize> = Octree::new(config).unwrap();

        // Two deeply overlapping boxes and one shallowly overlapping one.
        let deep1 = index
            .insert_with_bounds(
                [1000.0, 1000.0, 1000.0],
                10,
                0,
                Aabb::from_center_half_extent([1000.0, 1000.0, 1000.0], 50.0).unwrap(),
            )
            .unwrap();
        let deep2 = index
            .insert_with_bounds(
                [1010.0, 1000.0, 1000.0],
                10,
                1,
                Aabb::from_center_half_extent([1010.0, 1000.0, 1000.0], 50.0).unwrap(),
            )
            .unwrap();
        let shallow = index
            .insert_with_bounds(
                [1095.0, 1000.0, 1000.0],
                10,
                2,
                Aabb::from_center_half_extent([1095.0, 1000.0, 1000.0], 50.0).unwrap(),
            )
            .unwrap();

        let pairs = index.find_all_collisions();
        // deep1-deep2 overlap 90, deep2-shallow 15, deep1-shallow 5.
        assert_eq!(pairs.len(), 3);
        assert!(pairs[0].penetration_depth >= pairs[1].penetration_depth);
        assert!(pairs[1].penetration_depth >= pairs[2].penetration_depth);
        for pair in pairs.iter() {
            assert!(pair.id1 < pair.id2);
        }
        assert_eq!((pairs[0].id1, pairs[0].id2), (deep1, deep2));

        let of_deep1 = index.find_collisions(deep1);
        assert_eq!(of_deep1.len(), 2);

        // Region far away sees nothing.
        let far = Aabb::new([500000.0, 500000.0, 500000.0], [600000.0, 600000.0, 600000.0])
            .unwrap();
        assert!(index.find_collisions_in_region(&far).is_empty());
        let near = Aabb::new([900.0, 900.0, 900.0], [1200.0, 1100.0, 1100.0]).unwrap();
        assert_eq!(index.find_collisions_in_region(&near).len(), 3);
        let _ = shallow;
    }

    #[test]
    fn test_collision_agreement_with_brute_force() {
        let config = IndexConfig {
            min_span_threshold: 0.0,
            ..IndexConfig::default()
        };
        let index: Octree<usize> = Octree::new(config).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        let between = rand::distributions::Uniform::from(1000.0..3000.0);
        let mut entities = Vec::new();
        for i in 0..60 {
            let center = [
                between.sample(&mut rng),
                between.sample(&mut rng),
                between.sample(&mut rng),
            ];
            let bounds = Aabb::from_center_half_extent(center, 80.0).unwrap();
            let id = index.insert_with_bounds(center, 10, i, bounds).unwrap();
            entities.push((id, bounds));
        }

        let mut expected = HashSet::new();
        for (first, (a, bounds_a)) in entities.iter().enumerate() {
            for (b, bounds_b) in entities.iter().skip(first + 1) {
                if bounds_a.intersects(bounds_b)
                    && bounds_a.intersection(bounds_b).is_some()
                {
                    expected.insert((*a.min(b), *a.max(b)));
                }
            }
        }

        let found: HashSet<(EntityId, EntityId)> = index
            .find_all_collisions()
            .into_iter()
            .map(|pair| (pair.id1, pair.id2))
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_enclosing_queries() {
        let index = octree();
        let position = [4000.0, 4000.0, 4000.0];
        let id = index.insert(position, 10, 0).unwrap();

        let node = index.enclosing_point(&position, 10).unwrap().unwrap();
        assert!(node.entity_ids.contains(&id));
        assert!(index.enclosing_point(&position, 5).unwrap().is_none());

        let probe = Aabb::from_center_half_extent(position, 1.0).unwrap();
        let enclosing = index.enclosing_volume(probe).unwrap();
        assert_eq!(enclosing.key.level(), 10);
        assert!(enclosing.entity_ids.contains(&id));
    }
}
