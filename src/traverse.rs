//! Visitor traversal over the sparse tree.
//!
//! The tree has no stored edges, so the traversal forest is rebuilt from
//! a snapshot of the present keys: each key hangs under its nearest
//! present ancestor, keys without one are roots. Recursion depth is
//! bounded by the maximum refinement level.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::geometry::Aabb;
use crate::index::SpatialIndex;
use crate::key::SpatialKey;
use crate::node::Node;
use crate::types::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalStrategy {
    PreOrder,
    PostOrder,
    BreadthFirst,
}

/// Visitor verdict for the current node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Do not descend below this node. Meaningless after a post-order
    /// visit, where it acts like `Continue`.
    SkipSubtree,
    Stop,
}

pub trait Visitor<K> {
    fn visit(&mut self, key: &K, node: &Node, depth: usize, entity_ids: &[EntityId]) -> Visit;
}

impl<K, F> Visitor<K> for F
where
    F: FnMut(&K, &Node, usize, &[EntityId]) -> Visit,
{
    fn visit(&mut self, key: &K, node: &Node, depth: usize, entity_ids: &[EntityId]) -> Visit {
        self(key, node, depth, entity_ids)
    }
}

struct Forest<K> {
    roots: Vec<K>,
    children: HashMap<K, Vec<K>>,
}

fn build_forest<K: SpatialKey>(keys: &[K]) -> Forest<K> {
    let present: HashSet<K> = keys.iter().copied().collect();
    let mut roots = Vec::new();
    let mut children: HashMap<K, Vec<K>> = HashMap::new();

    for key in keys.iter() {
        let mut ancestor = key.parent();
        let mut nearest = None;
        while let Some(candidate) = ancestor {
            if present.contains(&candidate) {
                nearest = Some(candidate);
                break;
            }
            ancestor = candidate.parent();
        }
        match nearest {
            Some(parent) => children.entry(parent).or_default().push(*key),
            None => roots.push(*key),
        }
    }
    roots.sort();
    for kids in children.values_mut() {
        kids.sort();
    }
    Forest { roots, children }
}

impl<K: SpatialKey, C: Clone + Send + Sync> SpatialIndex<K, C> {
    /// Walk every node with the visitor in the given order.
    pub fn traverse<V: Visitor<K>>(&self, visitor: &mut V, strategy: TraversalStrategy) {
        self.walk(self.nodes.keys(), visitor, strategy);
    }

    /// Walk the subtree rooted at `start` (inclusive, when present).
    pub fn traverse_from<V: Visitor<K>>(
        &self,
        visitor: &mut V,
        strategy: TraversalStrategy,
        start: &K,
    ) {
        let keys: Vec<K> = self
            .nodes
            .keys()
            .into_iter()
            .filter(|key| key == start || start.is_ancestor_of(key))
            .collect();
        self.walk(keys, visitor, strategy);
    }

    /// Walk only nodes whose cells intersect `region`. A cell outside the
    /// region prunes its whole subtree, since descendants nest inside it.
    pub fn traverse_region<V: Visitor<K>>(
        &self,
        visitor: &mut V,
        region: &Aabb,
        strategy: TraversalStrategy,
    ) {
        let keys: Vec<K> = self
            .nodes
            .keys()
            .into_iter()
            .filter(|key| key.cell_bounds().intersects(region))
            .collect();
        self.walk(keys, visitor, strategy);
    }

    fn walk<V: Visitor<K>>(&self, keys: Vec<K>, visitor: &mut V, strategy: TraversalStrategy) {
        let forest = build_forest(&keys);
        match strategy {
            TraversalStrategy::PreOrder => {
                let mut stopped = false;
                for root in forest.roots.iter() {
                    if stopped {
                        break;
                    }
                    self.pre_order(root, 0, &forest, visitor, &mut stopped);
                }
            }
            TraversalStrategy::PostOrder => {
                let mut stopped = false;
                for root in forest.roots.iter() {
                    if stopped {
                        break;
                    }
                    self.post_order(root, 0, &forest, visitor, &mut stopped);
                }
            }
            TraversalStrategy::BreadthFirst => self.breadth_first(&forest, visitor),
        }
    }

    fn pre_order<V: Visitor<K>>(
        &self,
        key: &K,
        depth: usize,
        forest: &Forest<K>,
        visitor: &mut V,
        stopped: &mut bool,
    ) {
        if *stopped {
            return;
        }
        let node = match self.nodes.get(key) {
            Some(node) => node,
            None => return,
        };
        let ids = node.entities();
        match visitor.visit(key, &node, depth, &ids) {
            Visit::Stop => *stopped = true,
            Visit::SkipSubtree => {}
            Visit::Continue => {
                if let Some(kids) = forest.children.get(key) {
                    for kid in kids.iter() {
                        if *stopped {
                            break;
                        }
                        self.pre_order(kid, depth + 1, forest, visitor, stopped);
                    }
                }
            }
        }
    }

    fn post_order<V: Visitor<K>>(
        &self,
        key: &K,
        depth: usize,
        forest: &Forest<K>,
        visitor: &mut V,
        stopped: &mut bool,
    ) {
        if *stopped {
            return;
        }
        if let Some(kids) = forest.children.get(key) {
            for kid in kids.iter() {
                if *stopped {
                    return;
                }
                self.post_order(kid, depth + 1, forest, visitor, stopped);
            }
        }
        if *stopped {
            return;
        }
        if let Some(node) = self.nodes.get(key) {
            let ids = node.entities();
            if visitor.visit(key, &node, depth, &ids) == Visit::Stop {
                *stopped = true;
            }
        }
    }

    fn breadth_first<V: Visitor<K>>(&self, forest: &Forest<K>, visitor: &mut V) {
        let mut queue: VecDeque<(K, usize)> =
            forest.roots.iter().map(|root| (*root, 0)).collect();
        while let Some((key, depth)) = queue.pop_front() {
            let node = match self.nodes.get(&key) {
                Some(node) => node,
                None => continue,
            };
            let ids = node.entities();
            match visitor.visit(&key, &node, depth, &ids) {
                Visit::Stop => return,
                Visit::SkipSubtree => {}
                Visit::Continue => {
                    if let Some(kids) = forest.children.get(&key) {
                        queue.extend(kids.iter().map(|kid| (*kid, depth + 1)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Octree;
    use crate::morton::MortonKey;
    use crate::types::IndexConfig;

    /// A two-level octree: one split cell with eight children, plus an
    /// unrelated far-away leaf.
    fn split_octree() -> Octree<u8> {
        let config = IndexConfig {
            capacity_hint: 4,
            ..IndexConfig::default()
        };
        let index = Octree::new(config).unwrap();
        let edge = MortonKey::edge_length(6);
        for octant in 0..8u8 {
            let offset = |bit: u8| if bit != 0 { 0.75 * edge } else { 0.25 * edge };
            index
                .insert(
                    [offset(octant & 1), offset(octant & 2), offset(octant & 4)],
                    6,
                    octant,
                )
                .unwrap();
        }
        index.insert([1000000.0, 1000000.0, 1000000.0], 6, 99).unwrap();
        index
    }

    fn collect_order(index: &Octree<u8>, strategy: TraversalStrategy) -> Vec<(MortonKey, usize)> {
        let mut order = Vec::new();
        let mut visitor = |key: &MortonKey, _: &Node, depth: usize, _: &[EntityId]| {
            order.push((*key, depth));
            Visit::Continue
        };
        index.traverse(&mut visitor, strategy);
        order
    }

    #[test]
    fn test_pre_order_visits_parents_first() {
        let index = split_octree();
        let order = collect_order(&index, TraversalStrategy::PreOrder);
        assert_eq!(order.len(), 10);

        let parent = MortonKey::enclosing(&[1.0, 1.0, 1.0], 6).unwrap();
        let parent_at = order.iter().position(|(key, _)| *key == parent).unwrap();
        for child in parent.children() {
            let child_at = order.iter().position(|(key, _)| *key == child).unwrap();
            assert!(parent_at < child_at);
            assert_eq!(order[child_at].1, order[parent_at].1 + 1);
        }
    }

    #[test]
    fn test_post_order_visits_children_first() {
        let index = split_octree();
        let order = collect_order(&index, TraversalStrategy::PostOrder);
        assert_eq!(order.len(), 10);

        let parent = MortonKey::enclosing(&[1.0, 1.0, 1.0], 6).unwrap();
        let parent_at = order.iter().position(|(key, _)| *key == parent).unwrap();
        for child in parent.children() {
            let child_at = order.iter().position(|(key, _)| *key == child).unwrap();
            assert!(child_at < parent_at);
        }
    }

    #[test]
    fn test_breadth_first_is_level_ordered() {
        let index = split_octree();
        let order = collect_order(&index, TraversalStrategy::BreadthFirst);
        assert_eq!(order.len(), 10);

        for pair in order.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_skip_subtree() {
        let index = split_octree();
        let parent = MortonKey::enclosing(&[1.0, 1.0, 1.0], 6).unwrap();

        let mut visited = Vec::new();
        let mut visitor = |key: &MortonKey, _: &Node, _: usize, _: &[EntityId]| {
            visited.push(*key);
            if *key == parent {
                Visit::SkipSubtree
            } else {
                Visit::Continue
            }
        };
        index.traverse(&mut visitor, TraversalStrategy::PreOrder);

        // Only the two level-6 nodes were visited.
        assert_eq!(visited.len(), 2);
        assert!(visited.iter().all(|key| key.level() == 6));
    }

    #[test]
    fn test_stop_aborts_traversal() {
        let index = split_octree();
        let mut count = 0;
        let mut visitor = |_: &MortonKey, _: &Node, _: usize, _: &[EntityId]| {
            count += 1;
            if count == 3 {
                Visit::Stop
            } else {
                Visit::Continue
            }
        };
        index.traverse(&mut visitor, TraversalStrategy::PreOrder);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_traverse_from_subtree() {
        let index = split_octree();
        let parent = MortonKey::enclosing(&[1.0, 1.0, 1.0], 6).unwrap();

        let mut visited = Vec::new();
        let mut visitor = |key: &MortonKey, _: &Node, depth: usize, _: &[EntityId]| {
            visited.push((*key, depth));
            Visit::Continue
        };
        index.traverse_from(&mut visitor, TraversalStrategy::PreOrder, &parent);

        // The split parent plus its eight children; the far leaf is not
        // part of this subtree.
        assert_eq!(visited.len(), 9);
        assert_eq!(visited[0], (parent, 0));
    }

    #[test]
    fn test_traverse_region_prunes() {
        let index = split_octree();
        let edge = MortonKey::edge_length(6);
        let region = Aabb::new([0.0, 0.0, 0.0], [0.4 * edge, 0.4 * edge, 0.4 * edge]).unwrap();

        let mut visited = Vec::new();
        let mut visitor = |key: &MortonKey, _: &Node, _: usize, _: &[EntityId]| {
            visited.push(*key);
            Visit::Continue
        };
        index.traverse_region(&mut visitor, &region, TraversalStrategy::PreOrder);

        // The split parent and its first-octant child intersect; the far
        // leaf and the other children do not.
        assert_eq!(visited.len(), 2);
        for key in visited {
            assert!(key.cell_bounds().intersects(&region));
        }
    }
}
