/// Fx-hashed map for compiler-internal tables keyed by small integers and names.
pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}
