use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

const DEFAULT_SHARDS: usize = 16;

/// In-memory, tenant-scoped map split into independently locked shards.
///
/// The shard is picked by hashing the entity key alone, so one entity is
/// always served by the same shard regardless of tenant. Lookups take the
/// read lock; no lock is ever held across an await point because none of
/// the methods are async.
pub struct Registry<K, V> {
    shards: Vec<RwLock<HashMap<(Uuid, K), V>>>,
}

impl<K, V> Registry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<(Uuid, K), V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub fn get(&self, tenant: Uuid, key: &K) -> Option<V> {
        let shard = self.shard(key).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(&(tenant, key.clone())).cloned()
    }

    /// Inserts or replaces, returning the previous value.
    pub fn insert(&self, tenant: Uuid, key: K, value: V) -> Option<V> {
        let mut shard = self
            .shard(&key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        shard.insert((tenant, key), value)
    }

    /// Inserts only when the key is absent for the tenant. Returns whether
    /// the value was stored.
    pub fn insert_new(&self, tenant: Uuid, key: K, value: V) -> bool {
        let mut shard = self
            .shard(&key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.entry((tenant, key)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn remove(&self, tenant: Uuid, key: &K) -> Option<V> {
        let mut shard = self
            .shard(key)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        shard.remove(&(tenant, key.clone()))
    }

    /// Snapshot of every key held for `tenant`.
    pub fn keys(&self, tenant: Uuid) -> Vec<K> {
        self.shards
            .iter()
            .flat_map(|shard| {
                let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
                shard
                    .keys()
                    .filter(|(t, _)| *t == tenant)
                    .map(|(_, k)| k.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
