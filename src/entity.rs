//! Entity storage: id allocation, payload records and the entity-to-node
//! location map.
//!
//! The store is a coarse concurrent map; the index keeps the location set
//! in sync with the node store on every mutation, so the reverse mapping
//! `key -> ids` held by the nodes and the `id -> keys` sets here always
//! agree.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::geometry::Aabb;
use crate::key::SpatialKey;
use crate::types::{Coord, EntityId};

/// Stored payload and bookkeeping of one entity.
#[derive(Clone, Debug)]
pub struct EntityRecord<K, C> {
    pub position: Coord,
    pub bounds: Option<Aabb>,
    pub content: C,
    pub locations: HashSet<K>,
}

pub struct EntityStore<K, C> {
    next_id: AtomicU64,
    records: RwLock<HashMap<EntityId, EntityRecord<K, C>>>,
}

impl<K: SpatialKey, C: Clone> EntityStore<K, C> {
    pub fn new() -> Self {
        EntityStore {
            next_id: AtomicU64::new(1),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate the next id; strictly monotone.
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert or overwrite the record of `id`.
    ///
    /// Caller-chosen ids advance the allocator so later `allocate` calls
    /// stay unique.
    pub fn put(&self, id: EntityId, position: Coord, bounds: Option<Aabb>, content: C) {
        self.next_id.fetch_max(id.0 + 1, Ordering::Relaxed);
        self.records.write().insert(
            id,
            EntityRecord {
                position,
                bounds,
                content,
                locations: HashSet::new(),
            },
        );
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.records.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.records.read().keys().copied().collect()
    }

    pub fn position(&self, id: EntityId) -> Option<Coord> {
        self.records.read().get(&id).map(|record| record.position)
    }

    pub fn bounds(&self, id: EntityId) -> Option<Aabb> {
        self.records.read().get(&id).and_then(|record| record.bounds)
    }

    pub fn content(&self, id: EntityId) -> Option<C> {
        self.records.read().get(&id).map(|record| record.content.clone())
    }

    /// Position and bounds in one read.
    pub fn placement(&self, id: EntityId) -> Option<(Coord, Option<Aabb>)> {
        self.records
            .read()
            .get(&id)
            .map(|record| (record.position, record.bounds))
    }

    pub fn add_location(&self, id: EntityId, key: K) -> bool {
        match self.records.write().get_mut(&id) {
            Some(record) => record.locations.insert(key),
            None => false,
        }
    }

    pub fn remove_location(&self, id: EntityId, key: &K) -> bool {
        match self.records.write().get_mut(&id) {
            Some(record) => record.locations.remove(key),
            None => false,
        }
    }

    /// The keys of every node the entity is stored in, sorted.
    pub fn locations(&self, id: EntityId) -> Option<Vec<K>> {
        self.records.read().get(&id).map(|record| {
            let mut keys: Vec<K> = record.locations.iter().copied().collect();
            keys.sort();
            keys
        })
    }

    /// Drop the record, returning the keys the entity occupied.
    pub fn remove(&self, id: EntityId) -> Option<EntityRecord<K, C>> {
        self.records.write().remove(&id)
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morton::MortonKey;

    fn key(x: f32, level: u8) -> MortonKey {
        MortonKey::enclosing(&[x, 0.0, 0.0], level).unwrap()
    }

    #[test]
    fn test_allocator_is_monotone() {
        let store: EntityStore<MortonKey, i32> = EntityStore::new();
        let a = store.allocate();
        let b = store.allocate();
        let c = store.allocate();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_put_advances_allocator() {
        let store: EntityStore<MortonKey, i32> = EntityStore::new();
        store.put(EntityId(100), [1.0, 2.0, 3.0], None, 7);
        assert!(store.allocate() > EntityId(100));
    }

    #[test]
    fn test_record_accessors() {
        let store: EntityStore<MortonKey, &str> = EntityStore::new();
        let id = store.allocate();
        store.put(id, [1.0, 2.0, 3.0], None, "payload");

        assert!(store.contains(id));
        assert_eq!(store.position(id), Some([1.0, 2.0, 3.0]));
        assert_eq!(store.content(id), Some("payload"));
        assert_eq!(store.bounds(id), None);

        // Unknown ids read as None, not as errors.
        assert_eq!(store.position(EntityId(999)), None);
        assert_eq!(store.content(EntityId(999)), None);
    }

    #[test]
    fn test_location_bookkeeping() {
        let store: EntityStore<MortonKey, i32> = EntityStore::new();
        let id = store.allocate();
        store.put(id, [5.0, 5.0, 5.0], None, 0);

        let a = key(5.0, 10);
        let b = key(4000.0, 10);
        assert!(store.add_location(id, a));
        assert!(store.add_location(id, b));
        assert!(!store.add_location(id, a));
        assert_eq!(store.locations(id).unwrap().len(), 2);

        assert!(store.remove_location(id, &a));
        assert!(!store.remove_location(id, &a));
        assert_eq!(store.locations(id).unwrap(), vec![b]);

        let record = store.remove(id).unwrap();
        assert_eq!(record.locations.len(), 1);
        assert!(!store.contains(id));
        assert!(store.remove(id).is_none());
    }
}
