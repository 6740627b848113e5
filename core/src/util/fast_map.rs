//! Fx-hashed map and set aliases for host-side bookkeeping (object census,
//! chunk string dedup). The scripting tables never go through these.

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_set_with_capacity<K>(capacity: usize) -> FastHashSet<K> {
    rustc_hash::FxHashSet::with_capacity_and_hasher(capacity, Default::default())
}
