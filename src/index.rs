//! The spatial index: insertion engine, entity lifecycle and bulk loading.
//!
//! One generic implementation serves both partitionings; `Octree` and
//! `Tetree` are aliases fixing the key flavor. The index composes the
//! entity store, the node store and the lock manager; parent/child
//! relations are recomputed from keys, never stored.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::entity::EntityStore;
use crate::error::SpatialError;
use crate::geometry::Aabb;
use crate::key::SpatialKey;
use crate::locks::{BulkGate, Deadline, LockManager};
use crate::morton::MortonKey;
use crate::node::NodeStore;
use crate::tetree::TetKey;
use crate::types::{
    BatchInsertionResult, BulkConfig, Coord, EntityId, EntityStats, IndexConfig, PointType,
};

/// Injected split decision: `(entity count, level, capacity hint)`.
pub type SplitPolicy = dyn Fn(usize, u8, u32) -> bool + Send + Sync;

pub(crate) struct BulkState<K> {
    pub(crate) deferred: Vec<K>,
    pub(crate) limit_override: Option<usize>,
}

pub struct SpatialIndex<K: SpatialKey, C: Clone + Send + Sync> {
    pub(crate) config: IndexConfig,
    pub(crate) entities: EntityStore<K, C>,
    pub(crate) nodes: NodeStore<K>,
    pub(crate) locks: LockManager<K>,
    pub(crate) bulk_gate: BulkGate,
    pub(crate) bulk: Mutex<BulkState<K>>,
    pub(crate) split_policy: Box<SplitPolicy>,
}

/// Octree-flavored spatial index.
pub type Octree<C> = SpatialIndex<MortonKey, C>;

/// Tetree-flavored spatial index.
pub type Tetree<C> = SpatialIndex<TetKey, C>;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct InsertReport {
    pub(crate) nodes_created: usize,
    pub(crate) nodes_modified: usize,
    pub(crate) deferred: usize,
}

impl<K: SpatialKey, C: Clone + Send + Sync> SpatialIndex<K, C> {
    pub fn new(config: IndexConfig) -> Result<Self, SpatialError> {
        config.validate()?;
        let locking_mode = config.locking_mode;
        Ok(SpatialIndex {
            config,
            entities: EntityStore::new(),
            nodes: NodeStore::new(),
            locks: LockManager::new(locking_mode),
            bulk_gate: BulkGate::new(),
            bulk: Mutex::new(BulkState {
                deferred: Vec::new(),
                limit_override: None,
            }),
            split_policy: Box::new(|count, _level, capacity| count > capacity as usize),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Replace the split decision; the default splits leaves whose entity
    /// count exceeds the capacity hint.
    pub fn set_split_policy(
        &mut self,
        policy: impl Fn(usize, u8, u32) -> bool + Send + Sync + 'static,
    ) {
        self.split_policy = Box::new(policy);
    }

    pub(crate) fn deadline(&self) -> Deadline {
        Deadline::after(self.config.lock_timeout)
    }

    fn validate_level(&self, level: u8) -> Result<(), SpatialError> {
        if level > self.config.max_level {
            return Err(SpatialError::InvalidArgument(format!(
                "level {} exceeds configured maximum {}",
                level, self.config.max_level
            )));
        }
        Ok(())
    }

    fn validate_bounds(&self, bounds: &Aabb) -> Result<(), SpatialError> {
        use crate::constants::MAX_EXTENT;
        for axis in 0..3 {
            if bounds.min[axis] < 0.0 || bounds.max[axis] > MAX_EXTENT {
                return Err(SpatialError::InvalidArgument(format!(
                    "bounds {:?} extend past the domain [0, {})",
                    bounds, MAX_EXTENT
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn should_span(&self, size: PointType, node_edge: PointType) -> bool {
        self.config.spanning_policy.spanning_enabled()
            && size > self.config.min_span_threshold * node_edge
    }

    /// Follow `has_children` marks down to the leaf covering `position`.
    fn resolve_leaf(&self, mut key: K, position: &Coord) -> Result<K, SpatialError> {
        loop {
            let descend = self
                .nodes
                .with_node(&key, |node| node.has_children())
                .unwrap_or(false);
            if !descend || key.level() >= self.config.max_level {
                return Ok(key);
            }
            key = K::enclosing(position, key.level() + 1)?;
        }
    }

    /// Replace keys whose nodes are interior with their overlapping leaf
    /// descendants.
    fn resolve_span_leaves(&self, keys: Vec<K>, bounds: &Aabb) -> Vec<K> {
        let mut result = Vec::new();
        let mut stack = keys;
        while let Some(key) = stack.pop() {
            let interior = self
                .nodes
                .with_node(&key, |node| node.has_children())
                .unwrap_or(false);
            if interior && key.level() < self.config.max_level {
                for child in key.children() {
                    if child.cell_bounds().intersects(bounds) {
                        stack.push(child);
                    }
                }
            } else {
                result.push(key);
            }
        }
        result.sort();
        result.dedup();
        result
    }

    /// The node keys an insertion writes to.
    fn target_keys(
        &self,
        position: &Coord,
        level: u8,
        bounds: Option<&Aabb>,
    ) -> Result<Vec<K>, SpatialError> {
        use crate::types::SpanningPolicy;

        if let Some(bounds) = bounds {
            if self.should_span(bounds.max_extent(), K::edge_length(level)) {
                let mut keys = K::overlapping_keys(bounds, level);
                if keys.is_empty() {
                    keys.push(K::enclosing(position, level)?);
                }
                if self.config.spanning_policy == SpanningPolicy::SpanToLeavesOnly {
                    keys = self.resolve_span_leaves(keys, bounds);
                }
                return Ok(keys);
            }
        }
        let key = self.resolve_leaf(K::enclosing(position, level)?, position)?;
        Ok(vec![key])
    }

    /// Single insert with an allocated id.
    pub fn insert(&self, position: Coord, level: u8, content: C) -> Result<EntityId, SpatialError> {
        let id = self.entities.allocate();
        self.insert_with_id(id, position, level, content, None)?;
        Ok(id)
    }

    /// Single insert of an entity with bounds.
    pub fn insert_with_bounds(
        &self,
        position: Coord,
        level: u8,
        content: C,
        bounds: Aabb,
    ) -> Result<EntityId, SpatialError> {
        let id = self.entities.allocate();
        self.insert_with_id(id, position, level, content, Some(bounds))?;
        Ok(id)
    }

    /// Insert with a caller-chosen id, overwriting any previous entity
    /// under that id.
    pub fn insert_with_id(
        &self,
        id: EntityId,
        position: Coord,
        level: u8,
        content: C,
        bounds: Option<Aabb>,
    ) -> Result<(), SpatialError> {
        self.insert_with_deadline(id, position, level, content, bounds, self.deadline())
            .map(|_| ())
    }

    /// Insert honoring a caller-supplied deadline.
    pub fn insert_with_deadline(
        &self,
        id: EntityId,
        position: Coord,
        level: u8,
        content: C,
        bounds: Option<Aabb>,
        deadline: Deadline,
    ) -> Result<(), SpatialError> {
        self.insert_inner(id, position, level, content, bounds, deadline)
            .map(|_| ())
    }

    pub(crate) fn insert_inner(
        &self,
        id: EntityId,
        position: Coord,
        level: u8,
        content: C,
        bounds: Option<Aabb>,
        deadline: Deadline,
    ) -> Result<InsertReport, SpatialError> {
        self.validate_level(level)?;
        if let Some(ref bounds) = bounds {
            self.validate_bounds(bounds)?;
        }
        // Validates coordinates before anything is written.
        K::enclosing(&position, level)?;

        let bulk_owner = self.bulk_gate.is_owner();
        if !bulk_owner {
            self.bulk_gate.admit_writer(deadline)?;
        }

        if self.entities.contains(id) {
            self.remove_with_deadline(id, deadline)?;
        }

        self.entities.put(id, position, bounds.clone(), content);

        let mut report = InsertReport::default();
        let spanned = bounds
            .as_ref()
            .map_or(false, |b| self.should_span(b.max_extent(), K::edge_length(level)));
        // A concurrent split can turn the resolved leaf into an interior
        // node between resolution and acquisition; re-resolve until the
        // target set is stable under its locks.
        let keys = loop {
            let keys = self.target_keys(&position, level, bounds.as_ref())?;
            let mut write = || {
                if !spanned {
                    for key in keys.iter() {
                        let interior = self
                            .nodes
                            .with_node(key, |node| node.has_children())
                            .unwrap_or(false);
                        if interior && key.level() < self.config.max_level {
                            return false;
                        }
                    }
                }
                for key in keys.iter() {
                    if self.nodes.insert_entity(key, id) {
                        report.nodes_created += 1;
                    } else {
                        report.nodes_modified += 1;
                    }
                    self.entities.add_location(id, *key);
                }
                true
            };
            let stable = if bulk_owner {
                write()
            } else {
                self.locks.with_multi_write(&keys, deadline, write)?
            };
            if stable {
                break keys;
            }
        };

        for key in keys.iter() {
            report.deferred += self.consider_split(key, deadline)?;
        }
        Ok(report)
    }

    /// Enqueue or run a split when the policy asks for one. Returns the
    /// number of deferred subdivisions (bulk mode only).
    fn consider_split(&self, key: &K, deadline: Deadline) -> Result<usize, SpatialError> {
        let count = self.nodes.entity_count(key);
        let level = key.level();
        if level >= self.config.max_level
            || !(self.split_policy)(count, level, self.config.capacity_hint)
        {
            return Ok(0);
        }
        let splittable = self
            .nodes
            .with_node(key, |node| node.is_leaf() && !node.is_unsplittable())
            .unwrap_or(false);
        if !splittable {
            return Ok(0);
        }

        if self.bulk_gate.is_owner() {
            let mut bulk = self.bulk.lock();
            if bulk.deferred.contains(key) {
                return Ok(0);
            }
            let limit = bulk
                .limit_override
                .unwrap_or(self.config.capacity_hint as usize * 8);
            if bulk.deferred.len() >= limit {
                return Err(SpatialError::CapacityExceeded(bulk.deferred.len()));
            }
            bulk.deferred.push(*key);
            Ok(1)
        } else {
            self.split_cascade(*key, deadline)?;
            Ok(0)
        }
    }

    /// Remove an entity everywhere. Returns `false` for unknown ids, so a
    /// second removal of the same id reads `(true, false)`.
    pub fn remove_entity(&self, id: EntityId) -> Result<bool, SpatialError> {
        self.remove_with_deadline(id, self.deadline())
    }

    pub fn remove_with_deadline(
        &self,
        id: EntityId,
        deadline: Deadline,
    ) -> Result<bool, SpatialError> {
        let bulk_owner = self.bulk_gate.is_owner();
        if !bulk_owner {
            self.bulk_gate.admit_writer(deadline)?;
        }

        // The location set can move underneath us while the balancer
        // redistributes; lock, re-read and retry until it is stable.
        loop {
            let locations = match self.entities.locations(id) {
                Some(locations) => locations,
                None => return Ok(false),
            };

            let remove = || {
                let current = self.entities.locations(id).unwrap_or_default();
                if current != locations {
                    return false;
                }
                for key in locations.iter() {
                    self.nodes.remove_entity(key, id);
                    if !self.nodes.contains(key) {
                        self.locks.discard(key);
                    }
                }
                true
            };
            let stable = if bulk_owner {
                remove()
            } else {
                self.locks.with_multi_write(&locations, deadline, remove)?
            };
            if stable {
                self.entities.remove(id);
                return Ok(true);
            }
        }
    }

    /// Move an entity to a new position, translating its bounds.
    pub fn update_entity(
        &self,
        id: EntityId,
        new_position: Coord,
        level: u8,
    ) -> Result<(), SpatialError> {
        self.update_with_deadline(id, new_position, level, self.deadline())
    }

    pub fn update_with_deadline(
        &self,
        id: EntityId,
        new_position: Coord,
        level: u8,
        deadline: Deadline,
    ) -> Result<(), SpatialError> {
        self.validate_level(level)?;
        K::enclosing(&new_position, level)?;

        let (old_position, old_bounds) = self
            .entities
            .placement(id)
            .ok_or(SpatialError::NotFound(id.0))?;
        let content = self
            .entities
            .content(id)
            .ok_or(SpatialError::NotFound(id.0))?;
        let delta = [
            new_position[0] - old_position[0],
            new_position[1] - old_position[1],
            new_position[2] - old_position[2],
        ];
        let new_bounds = old_bounds.map(|bounds| bounds.translated(&delta));
        if let Some(ref bounds) = new_bounds {
            self.validate_bounds(bounds)?;
        }

        self.remove_with_deadline(id, deadline)?;
        self.insert_inner(id, new_position, level, content, new_bounds, deadline)?;
        Ok(())
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains(id)
    }

    pub fn get_content(&self, id: EntityId) -> Option<C> {
        self.entities.content(id)
    }

    pub fn get_position(&self, id: EntityId) -> Option<Coord> {
        self.entities.position(id)
    }

    pub fn get_bounds(&self, id: EntityId) -> Option<Aabb> {
        self.entities.bounds(id)
    }

    /// Keys of every node the entity occupies, sorted.
    pub fn locations(&self, id: EntityId) -> Option<Vec<K>> {
        self.entities.locations(id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ids stored at the cell enclosing `position` at `level`, including
    /// entities pinned in ancestors by spanning and entities pushed into
    /// descendants by splits.
    pub fn lookup(&self, position: &Coord, level: u8) -> Result<Vec<EntityId>, SpatialError> {
        self.validate_level(level)?;
        let key = K::enclosing(position, level)?;
        let cell = key.cell_bounds();
        let deadline = self.deadline();

        let mut ids = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut collect = |node_key: &K, restrict: bool| -> Result<(), SpatialError> {
            let entities = self
                .locks
                .with_read(node_key, deadline, || {
                    self.nodes
                        .with_node(node_key, |node| node.entities())
                        .unwrap_or_default()
                })?;
            for id in entities {
                if !seen.insert(id) {
                    continue;
                }
                if restrict {
                    let matches = match self.entities.placement(id) {
                        Some((position, bounds)) => {
                            key.contains_point(&position)
                                || bounds.map_or(false, |bounds| bounds.intersects(&cell))
                        }
                        None => false,
                    };
                    if !matches {
                        seen.remove(&id);
                        continue;
                    }
                }
                ids.push(id);
            }
            Ok(())
        };

        // The cell itself and every ancestor holding pinned entities.
        collect(&key, false)?;
        let mut current = key.parent();
        while let Some(ancestor) = current {
            if self.nodes.contains(&ancestor) {
                collect(&ancestor, true)?;
            }
            current = ancestor.parent();
        }

        // Descendants along the position chain, left behind by splits.
        let max_level = self.nodes.max_level();
        for deeper in (level + 1)..=max_level {
            let descendant = K::enclosing(position, deeper)?;
            if self.nodes.contains(&descendant) {
                collect(&descendant, false)?;
            }
        }

        ids.sort();
        Ok(ids)
    }

    pub fn get_stats(&self) -> EntityStats {
        EntityStats {
            node_count: self.nodes.len(),
            entity_count: self.entities.len(),
            total_entity_references: self.nodes.total_entity_references(),
            max_depth: self.nodes.max_level(),
        }
    }

    /// Drop all nodes and entities atomically.
    pub fn clear(&self) -> Result<(), SpatialError> {
        let deadline = self.deadline();
        let owned = self.bulk_gate.is_owner();
        if !owned {
            loop {
                self.bulk_gate.admit_writer(deadline)?;
                if self.bulk_gate.enable().is_ok() {
                    break;
                }
            }
        }
        self.nodes.clear();
        self.entities.clear();
        self.bulk.lock().deferred.clear();
        if !owned {
            self.bulk_gate.disable()?;
        }
        Ok(())
    }

    pub fn configure_bulk_operations(&self, config: BulkConfig) {
        self.bulk.lock().limit_override = config.deferred_split_limit;
    }

    /// Enter bulk-loading mode: this thread becomes the single writer and
    /// subdivisions are deferred until `finalize_bulk_loading`.
    pub fn enable_bulk_loading(&self) -> Result<(), SpatialError> {
        self.bulk_gate.enable()
    }

    /// Replay deferred subdivisions bottom-up and release the gate.
    /// Returns the number of splits performed.
    pub fn finalize_bulk_loading(&self) -> Result<usize, SpatialError> {
        if !self.bulk_gate.is_owner() {
            return Err(SpatialError::InvalidArgument(
                "bulk loading not enabled by this thread".to_string(),
            ));
        }
        let deadline = self.deadline();
        let mut queue = std::mem::take(&mut self.bulk.lock().deferred);
        // Popped from the back, so shallow levels sort first and the
        // deepest deferred split replays first.
        queue.sort_by_key(|key| key.level());

        let mut performed = 0;
        while let Some(key) = queue.pop() {
            match self.split_once(&key, deadline)? {
                crate::balance::SplitOutcome::Split(overfull) => {
                    performed += 1;
                    for child in overfull {
                        if (self.split_policy)(
                            self.nodes.entity_count(&child),
                            child.level(),
                            self.config.capacity_hint,
                        ) {
                            queue.push(child);
                        }
                    }
                }
                crate::balance::SplitOutcome::LevelOverflow => {
                    debug!(key = ?key, "deferred split hit the maximum refinement level");
                }
                _ => {}
            }
        }
        self.bulk_gate.disable()?;
        Ok(performed)
    }

    /// Batch insertion of point entities at one level.
    ///
    /// Per-input failures are collected without aborting the batch. When
    /// the index is not already in bulk mode the call enters it and
    /// finalizes before returning.
    pub fn insert_batch(
        &self,
        positions: &[Coord],
        contents: Vec<C>,
        level: u8,
    ) -> Result<BatchInsertionResult, SpatialError> {
        if positions.len() != contents.len() {
            return Err(SpatialError::InvalidArgument(format!(
                "positions ({}) and contents ({}) differ in length",
                positions.len(),
                contents.len()
            )));
        }
        self.validate_level(level)?;

        let started = Instant::now();
        let entered = if self.bulk_gate.is_owner() {
            false
        } else {
            let deadline = self.deadline();
            loop {
                self.bulk_gate.admit_writer(deadline)?;
                if self.bulk_gate.enable().is_ok() {
                    break true;
                }
            }
        };

        // All ids pre-allocated contiguously.
        let ids: Vec<EntityId> = positions.iter().map(|_| self.entities.allocate()).collect();

        let mut result = BatchInsertionResult::default();
        let deadline = self.deadline();
        for (index, (position, content)) in positions.iter().zip(contents.into_iter()).enumerate() {
            match self.insert_inner(ids[index], *position, level, content, None, deadline) {
                Ok(report) => {
                    result.inserted_ids.push(ids[index]);
                    result.success_count += 1;
                    result.nodes_created += report.nodes_created;
                    result.nodes_modified += report.nodes_modified;
                    result.subdivisions_deferred += report.deferred;
                }
                Err(SpatialError::CapacityExceeded(size)) => {
                    // The entity went in; only its subdivision queue entry
                    // was refused. Surface after finalizing.
                    result.inserted_ids.push(ids[index]);
                    result.success_count += 1;
                    result.failures.push((
                        index,
                        SpatialError::CapacityExceeded(size).to_string(),
                    ));
                }
                Err(error) => {
                    result.failure_count += 1;
                    result.failures.push((index, error.to_string()));
                }
            }
        }

        if entered {
            self.finalize_bulk_loading()?;
        }
        result.elapsed = started.elapsed();
        Ok(result)
    }
}
