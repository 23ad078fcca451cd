use hashbrown::HashMap;

/// Secondary index from an index key to natural keys, in insertion order.
pub type VecIndex<K> = HashMap<K, Vec<String>>;
