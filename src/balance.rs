//! Splitting and merging of tree nodes.
//!
//! A split redistributes a leaf's entities to the eight children by
//! position (or by bounds overlap for spanning entities) and turns the
//! leaf into an interior node. A split that would move every entity into
//! one single child is aborted and the leaf marked unsplittable, so
//! clustered data cannot drive an endless refinement cascade. A merge is
//! the inverse: a complete family of leaves jointly under capacity is
//! folded back into its parent.

use tracing::debug;

use crate::error::SpatialError;
use crate::index::SpatialIndex;
use crate::key::SpatialKey;
use crate::locks::Deadline;
use crate::types::EntityId;

pub(crate) enum SplitOutcome<K> {
    /// Children whose entity count now exceeds the policy, for cascading.
    Split(Vec<K>),
    /// All entities share one child; the node was marked unsplittable.
    Degenerate,
    /// The node sits on the maximum refinement level.
    LevelOverflow,
    /// The node is missing, interior or marked unsplittable.
    NotSplit,
}

/// Counters reported by a `rebalance` pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebalanceOutcome {
    pub splits: usize,
    pub merges: usize,
}

impl<K: SpatialKey, C: Clone + Send + Sync> SpatialIndex<K, C> {
    /// Split one leaf. The parent and all eight children are locked in
    /// ascending key order (children always sort after their parent).
    pub(crate) fn split_once(
        &self,
        key: &K,
        deadline: Deadline,
    ) -> Result<SplitOutcome<K>, SpatialError> {
        if key.level() >= self.config.max_level {
            debug!(key = ?key, "split refused at maximum refinement level");
            return Ok(SplitOutcome::LevelOverflow);
        }
        let children = key.children();
        let mut lock_keys = vec![*key];
        lock_keys.extend(children.iter().copied());

        self.locks.with_multi_write(&lock_keys, deadline, || {
            let splittable = self
                .nodes
                .with_node(key, |node| node.is_leaf() && !node.is_unsplittable())
                .unwrap_or(false);
            if !splittable {
                return SplitOutcome::NotSplit;
            }
            let ids = self
                .nodes
                .with_node(key, |node| node.entities())
                .unwrap_or_default();
            if ids.is_empty() {
                return SplitOutcome::NotSplit;
            }

            let child_level = key.level() + 1;
            let child_edge = K::edge_length(child_level);
            let mut assignments: Vec<(EntityId, Vec<K>)> = Vec::with_capacity(ids.len());
            let mut retained: Vec<EntityId> = Vec::new();
            for &id in ids.iter() {
                let (position, bounds) = match self.entities.placement(id) {
                    Some(placement) => placement,
                    None => continue,
                };
                let targets: Vec<K> = match bounds {
                    Some(bounds) if self.should_span(bounds.max_extent(), child_edge) => children
                        .iter()
                        .filter(|child| child.cell_bounds().intersects(&bounds))
                        .copied()
                        .collect(),
                    _ => match K::enclosing(&position, child_level) {
                        Ok(target) if children.contains(&target) => vec![target],
                        _ => Vec::new(),
                    },
                };
                if targets.is_empty() {
                    // Spanning entities whose position lies outside this
                    // cell stay pinned in the parent.
                    retained.push(id);
                } else {
                    assignments.push((id, targets));
                }
            }

            let mut first_target: Option<K> = None;
            let mut dispersed = false;
            for (_, targets) in assignments.iter() {
                if targets.len() != 1 {
                    dispersed = true;
                    break;
                }
                match first_target {
                    None => first_target = Some(targets[0]),
                    Some(first) if first != targets[0] => {
                        dispersed = true;
                        break;
                    }
                    _ => {}
                }
            }
            if !dispersed && retained.is_empty() && !assignments.is_empty() {
                self.nodes
                    .with_node_mut(key, |node| node.set_unsplittable(true));
                debug!(key = ?key, "split aborted: no spatial dispersion");
                return SplitOutcome::Degenerate;
            }

            for (id, targets) in assignments.iter() {
                for child in targets.iter() {
                    self.nodes.insert_entity(child, *id);
                    self.entities.add_location(*id, *child);
                }
            }
            self.nodes.with_node_mut(key, |node| {
                node.take_entities();
                node.set_has_children(true);
                for &id in retained.iter() {
                    node.insert_entity(id);
                }
            });
            for (id, _) in assignments.iter() {
                self.entities.remove_location(*id, key);
            }

            let overfull = children
                .iter()
                .filter(|child| {
                    (self.split_policy)(
                        self.nodes.entity_count(child),
                        child.level(),
                        self.config.capacity_hint,
                    )
                })
                .copied()
                .collect();
            SplitOutcome::Split(overfull)
        })
    }

    /// Split a leaf and keep splitting overfull children. Returns the
    /// number of splits performed.
    pub(crate) fn split_cascade(&self, key: K, deadline: Deadline) -> Result<usize, SpatialError> {
        let mut queue = vec![key];
        let mut performed = 0;
        while let Some(key) = queue.pop() {
            match self.split_once(&key, deadline)? {
                SplitOutcome::Split(overfull) => {
                    performed += 1;
                    queue.extend(overfull);
                }
                SplitOutcome::LevelOverflow => {
                    // The leaf stays oversized.
                }
                _ => {}
            }
        }
        Ok(performed)
    }

    /// Fold a complete family of leaves back into `key` when their joint
    /// entity count fits the capacity hint. Returns whether a merge
    /// happened.
    pub fn try_merge(&self, key: &K) -> Result<bool, SpatialError> {
        let deadline = self.deadline();
        let children = key.children();
        if children.len() != 8 {
            return Ok(false);
        }
        let mut lock_keys = vec![*key];
        lock_keys.extend(children.iter().copied());

        self.locks.with_multi_write(&lock_keys, deadline, || {
            let interior = self
                .nodes
                .with_node(key, |node| node.has_children())
                .unwrap_or(false);
            if !interior {
                return false;
            }

            let mut total = 0;
            for child in children.iter() {
                match self
                    .nodes
                    .with_node(child, |node| (node.is_leaf(), node.entity_count()))
                {
                    Some((true, count)) => total += count,
                    _ => return false,
                }
            }
            if total > self.config.capacity_hint as usize {
                return false;
            }

            for child in children.iter() {
                if let Some(node) = self.nodes.remove(child) {
                    for id in node.entities() {
                        self.entities.remove_location(id, child);
                        self.nodes.insert_entity(key, id);
                        self.entities.add_location(id, *key);
                    }
                }
                self.locks.discard(child);
            }
            self.nodes.with_node_mut(key, |node| {
                node.set_has_children(false);
                node.set_unsplittable(false);
            });
            true
        })
    }

    /// One balancing pass over the whole tree: split every oversized
    /// leaf, merge every underfull complete family.
    pub fn rebalance(&self) -> Result<RebalanceOutcome, SpatialError> {
        let deadline = self.deadline();
        let mut outcome = RebalanceOutcome::default();
        for (key, node) in self.nodes.in_order() {
            if node.is_leaf() {
                if !node.is_unsplittable()
                    && key.level() < self.config.max_level
                    && (self.split_policy)(
                        node.entity_count(),
                        key.level(),
                        self.config.capacity_hint,
                    )
                {
                    outcome.splits += self.split_cascade(key, deadline)?;
                }
            } else if self.try_merge(&key)? {
                outcome.merges += 1;
            }
        }
        Ok(outcome)
    }

    /// Number of nodes per populated level, for balancing heuristics.
    pub fn level_histogram(&self) -> Vec<(u8, usize)> {
        self.nodes.level_histogram()
    }
}
