//! Sparse node storage over a sorted key set.
//!
//! Nodes live in a `BTreeMap`, so in-order iteration follows the
//! space-filling curve and range seeks are logarithmic. Readers take
//! snapshots of the key set; iteration is weakly consistent under
//! concurrent mutation.

use std::collections::BTreeMap;
use std::collections::HashSet;

use parking_lot::RwLock;

use crate::constants::MAX_REFINEMENT_LEVEL;
use crate::key::SpatialKey;
use crate::types::EntityId;

/// One node of the tree: the entity ids stored here plus refinement flags.
#[derive(Clone, Debug, Default)]
pub struct Node {
    entities: HashSet<EntityId>,
    has_children: bool,
    unsplittable: bool,
}

impl Node {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains(&id)
    }

    pub fn has_children(&self) -> bool {
        self.has_children
    }

    pub fn is_leaf(&self) -> bool {
        !self.has_children
    }

    /// Marked by the balancer when a split produced no spatial dispersion;
    /// such a leaf is left oversized instead of splitting forever.
    pub fn is_unsplittable(&self) -> bool {
        self.unsplittable
    }

    pub(crate) fn insert_entity(&mut self, id: EntityId) -> bool {
        self.entities.insert(id)
    }

    pub(crate) fn remove_entity(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id)
    }

    pub(crate) fn take_entities(&mut self) -> HashSet<EntityId> {
        std::mem::take(&mut self.entities)
    }

    pub(crate) fn set_has_children(&mut self, value: bool) {
        self.has_children = value;
    }

    pub(crate) fn set_unsplittable(&mut self, value: bool) {
        self.unsplittable = value;
    }
}

struct Inner<K> {
    map: BTreeMap<K, Node>,
    level_counts: [usize; (MAX_REFINEMENT_LEVEL + 1) as usize],
}

pub struct NodeStore<K: SpatialKey> {
    inner: RwLock<Inner<K>>,
}

impl<K: SpatialKey> NodeStore<K> {
    pub fn new() -> Self {
        NodeStore {
            inner: RwLock::new(Inner {
                map: BTreeMap::new(),
                level_counts: [0; (MAX_REFINEMENT_LEVEL + 1) as usize],
            }),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// Snapshot clone of a node.
    pub fn get(&self, key: &K) -> Option<Node> {
        self.inner.read().map.get(key).cloned()
    }

    /// Run `f` against the node without cloning it.
    pub fn with_node<R>(&self, key: &K, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.inner.read().map.get(key).map(f)
    }

    /// Run `f` against the node, creating it first when absent.
    /// Returns `(created, result)`.
    pub fn with_node_mut_or_create<R>(
        &self,
        key: &K,
        f: impl FnOnce(&mut Node) -> R,
    ) -> (bool, R) {
        let mut inner = self.inner.write();
        let created = !inner.map.contains_key(key);
        if created {
            inner.level_counts[key.level() as usize] += 1;
        }
        let result = f(inner.map.entry(*key).or_insert_with(Node::default));
        (created, result)
    }

    /// Run `f` against an existing node; `None` when absent.
    pub fn with_node_mut<R>(&self, key: &K, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.inner.write().map.get_mut(key).map(f)
    }

    /// Add an entity id; creates the node when needed. Returns whether a
    /// node was created.
    pub fn insert_entity(&self, key: &K, id: EntityId) -> bool {
        let (created, _) = self.with_node_mut_or_create(key, |node| node.insert_entity(id));
        created
    }

    /// Remove an entity id; drops the node when it ends up as an empty
    /// leaf. Returns whether the id was present.
    pub fn remove_entity(&self, key: &K, id: EntityId) -> bool {
        let mut inner = self.inner.write();
        let (removed, empty_leaf) = match inner.map.get_mut(key) {
            Some(node) => (
                node.remove_entity(id),
                node.entity_count() == 0 && node.is_leaf(),
            ),
            None => (false, false),
        };
        if empty_leaf {
            inner.map.remove(key);
            inner.level_counts[key.level() as usize] -= 1;
        }
        removed
    }

    pub fn remove(&self, key: &K) -> Option<Node> {
        let mut inner = self.inner.write();
        let node = inner.map.remove(key);
        if node.is_some() {
            inner.level_counts[key.level() as usize] -= 1;
        }
        node
    }

    /// Snapshot of all keys in SFC order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.read().map.keys().copied().collect()
    }

    /// Snapshot of all keys and nodes in SFC order.
    pub fn in_order(&self) -> Vec<(K, Node)> {
        self.inner
            .read()
            .map
            .iter()
            .map(|(key, node)| (*key, node.clone()))
            .collect()
    }

    /// Snapshot of the keys in the inclusive range `[lo, hi]`.
    pub fn subrange(&self, lo: &K, hi: &K) -> Vec<K> {
        if lo > hi {
            return Vec::new();
        }
        self.inner.read().map.range(*lo..=*hi).map(|(key, _)| *key).collect()
    }

    /// Snapshot of the keys populated at one level.
    pub fn keys_at_level(&self, level: u8) -> Vec<K> {
        self.inner
            .read()
            .map
            .keys()
            .filter(|key| key.level() == level)
            .copied()
            .collect()
    }

    /// Levels that currently hold nodes, ascending.
    pub fn levels(&self) -> Vec<u8> {
        self.inner
            .read()
            .level_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(level, _)| level as u8)
            .collect()
    }

    /// Deepest populated level.
    pub fn max_level(&self) -> u8 {
        self.levels().last().copied().unwrap_or(0)
    }

    /// Node count per populated level, ascending.
    pub fn level_histogram(&self) -> Vec<(u8, usize)> {
        self.inner
            .read()
            .level_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(level, &count)| (level as u8, count))
            .collect()
    }

    pub fn entity_count(&self, key: &K) -> usize {
        self.with_node(key, |node| node.entity_count()).unwrap_or(0)
    }

    /// Sum of entity references across all nodes.
    pub fn total_entity_references(&self) -> usize {
        self.inner
            .read()
            .map
            .values()
            .map(|node| node.entity_count())
            .sum()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.level_counts = [0; (MAX_REFINEMENT_LEVEL + 1) as usize];
    }
}
