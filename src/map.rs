// The runtime hash map: a fixed, power-of-two array of singly linked
// chains. Iteration visits buckets in index order and then walks each
// chain, so the observable order is bucket-hash order, not insertion
// order. That order is part of the map's contract.

use crate::value::Value;


pub const BUCKET_COUNT: usize = 256;


#[derive(Debug)]
struct Entry {
    key: Value,
    value: Value,
    next: Option<Box<Entry>>,
}


#[derive(Debug)]
pub struct ValueMap {
    buckets: Vec<Option<Box<Entry>>>,
    size: usize,
}

impl ValueMap {
    pub fn new() -> ValueMap {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(None);
        }
        ValueMap { buckets, size: 0 }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn bucket_of(key: &Value) -> usize {
        (hash_value(key) as usize) & (BUCKET_COUNT - 1)
    }

    // Take a chain apart into owned entries, preserving order.
    fn unlink(mut chain: Option<Box<Entry>>) -> Vec<Box<Entry>> {
        let mut entries = Vec::new();
        while let Some(mut entry) = chain {
            chain = entry.next.take();
            entries.push(entry);
        }
        entries
    }

    // Put owned entries back together into a chain, preserving order.
    fn relink(entries: Vec<Box<Entry>>) -> Option<Box<Entry>> {
        let mut chain = None;
        for mut entry in entries.into_iter().rev() {
            entry.next = chain;
            chain = Some(entry);
        }
        chain
    }

    // Insert, overwriting an existing entry with an equal key.
    pub fn insert(&mut self, key: Value, value: Value) {
        let index = Self::bucket_of(&key);
        let mut entries = Self::unlink(self.buckets[index].take());
        match entries.iter().position(|entry| entry.key.equals(&key)) {
            Some(position) => entries[position].value = value,
            None => {
                entries.push(Box::new(Entry {
                    key,
                    value,
                    next: None,
                }));
                self.size += 1;
            }
        }
        self.buckets[index] = Self::relink(entries);
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let mut cursor = &self.buckets[Self::bucket_of(key)];
        while let Some(entry) = cursor {
            if entry.key.equals(key) {
                return Some(entry.value.clone());
            }
            cursor = &entry.next;
        }
        None
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    // Unlink the entry with an equal key, if any.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = Self::bucket_of(key);
        let mut entries = Self::unlink(self.buckets[index].take());
        let removed = match entries.iter().position(|entry| entry.key.equals(key)) {
            Some(position) => {
                self.size -= 1;
                Some(entries.remove(position).value)
            }
            None => None,
        };
        self.buckets[index] = Self::relink(entries);
        removed
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets.iter_mut() {
            *bucket = None;
        }
        self.size = 0;
    }

    // All entries in iteration order.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        let mut out = Vec::with_capacity(self.size);
        for bucket in &self.buckets {
            let mut cursor = bucket;
            while let Some(entry) = cursor {
                out.push((entry.key.clone(), entry.value.clone()));
                cursor = &entry.next;
            }
        }
        out
    }

    // The first entry at or after the (bucket, chain) cursor, with the
    // coordinates it was found at. Drives the map iterator.
    pub fn seek(&self, bucket: usize, chain: usize) -> Option<(usize, usize, Value, Value)> {
        for b in bucket..BUCKET_COUNT {
            let mut position = 0;
            let mut cursor = &self.buckets[b];
            while let Some(entry) = cursor {
                if b > bucket || position >= chain {
                    return Some((b, position, entry.key.clone(), entry.value.clone()));
                }
                position += 1;
                cursor = &entry.next;
            }
        }
        None
    }

    // A structurally shallow copy: the entries are cloned, the values
    // they reference are shared.
    pub fn copy(&self) -> ValueMap {
        let mut out = ValueMap::new();
        for (key, value) in self.entries() {
            out.insert(key, value);
        }
        out
    }

    pub fn equals(&self, other: &ValueMap) -> bool {
        if self.size != other.size {
            return false;
        }
        self.entries()
            .into_iter()
            .all(|(key, value)| match other.get(&key) {
                Some(other_value) => value.equals(&other_value),
                None => false,
            })
    }
}


fn rolling_hash(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(*b as u64))
}

// Booleans hash to 0/1, integers to their value, strings through the
// rolling hash, sequences by combining element hashes. Composite objects
// hash to 0 and so make poor keys; that limitation is accepted.
pub fn hash_value(value: &Value) -> u64 {
    match value {
        Value::Bool(b) => *b as u64,
        Value::Int(i) => *i as u64,
        // Whole-valued reals must agree with the equal integer.
        Value::Real(r) => r.trunc() as i64 as u64,
        Value::Char(c) => *c as u64,
        Value::Str(s) => rolling_hash(s.as_bytes()),
        Value::List(items) => items
            .borrow()
            .iter()
            .fold(0u64, |h, v| h.wrapping_mul(31).wrapping_add(hash_value(v))),
        Value::Tuple(items) => items
            .iter()
            .fold(0u64, |h, v| h.wrapping_mul(31).wrapping_add(hash_value(v))),
        _ => 0,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Value {
        Value::string(s)
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = ValueMap::new();
        assert_eq!(map.size(), 0);
        map.insert(k("a"), Value::Int(1));
        map.insert(k("b"), Value::Int(2));
        assert_eq!(map.size(), 2);
        assert_eq!(map.get(&k("a")), Some(Value::Int(1)));
        assert_eq!(map.get(&k("b")), Some(Value::Int(2)));
        assert_eq!(map.get(&k("c")), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut map = ValueMap::new();
        map.insert(k("a"), Value::Int(1));
        map.insert(k("a"), Value::Int(9));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&k("a")), Some(Value::Int(9)));
    }

    #[test]
    fn test_remove() {
        let mut map = ValueMap::new();
        map.insert(k("a"), Value::Int(1));
        map.insert(k("b"), Value::Int(2));
        assert_eq!(map.remove(&k("a")), Some(Value::Int(1)));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&k("a")), None);
        assert_eq!(map.remove(&k("a")), None);
        assert_eq!(map.get(&k("b")), Some(Value::Int(2)));
    }

    #[test]
    fn test_chain_collisions() {
        // Integer keys a bucket-count apart collide by construction.
        let mut map = ValueMap::new();
        for i in 0..4 {
            map.insert(Value::Int(i * BUCKET_COUNT as i64), Value::Int(i));
        }
        assert_eq!(map.size(), 4);
        for i in 0..4 {
            assert_eq!(
                map.get(&Value::Int(i * BUCKET_COUNT as i64)),
                Some(Value::Int(i))
            );
        }
        map.remove(&Value::Int(BUCKET_COUNT as i64));
        assert_eq!(map.size(), 3);
        assert_eq!(map.get(&Value::Int(BUCKET_COUNT as i64)), None);
        assert_eq!(map.get(&Value::Int(0)), Some(Value::Int(0)));
        assert_eq!(
            map.get(&Value::Int(2 * BUCKET_COUNT as i64)),
            Some(Value::Int(2))
        );
    }

    #[test]
    fn test_entries_cover_everything() {
        let mut map = ValueMap::new();
        map.insert(k("x"), Value::Int(1));
        map.insert(k("y"), Value::Int(2));
        map.insert(k("z"), Value::Int(3));
        let entries = map.entries();
        assert_eq!(entries.len(), 3);
        for name in &["x", "y", "z"] {
            assert!(entries.iter().any(|(key, _)| key.equals(&k(name))));
        }
    }

    #[test]
    fn test_seek_walks_in_entry_order() {
        let mut map = ValueMap::new();
        map.insert(k("x"), Value::Int(1));
        map.insert(k("y"), Value::Int(2));
        map.insert(k("z"), Value::Int(3));
        let mut seen = Vec::new();
        let mut bucket = 0;
        let mut chain = 0;
        while let Some((b, c, key, value)) = map.seek(bucket, chain) {
            seen.push((key, value));
            bucket = b;
            chain = c + 1;
        }
        assert_eq!(seen, map.entries());
    }

    #[test]
    fn test_clear() {
        let mut map = ValueMap::new();
        map.insert(k("a"), Value::Int(1));
        map.clear();
        assert_eq!(map.size(), 0);
        assert_eq!(map.get(&k("a")), None);
    }

    #[test]
    fn test_copy_is_shallow() {
        let shared = Value::list(vec![Value::Int(1)]);
        let mut map = ValueMap::new();
        map.insert(k("l"), shared.clone());
        let copy = map.copy();
        if let Value::List(items) = &shared {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(
            copy.get(&k("l")),
            Some(Value::list(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn test_equals() {
        let mut a = ValueMap::new();
        let mut b = ValueMap::new();
        a.insert(k("x"), Value::Int(1));
        b.insert(k("x"), Value::Int(1));
        assert!(a.equals(&b));
        b.insert(k("y"), Value::Int(2));
        assert!(!a.equals(&b));
    }

    #[test]
    fn test_numeric_key_identity() {
        // 2 and 2.0 are equal values, so they must collide as keys.
        let mut map = ValueMap::new();
        map.insert(Value::Int(2), Value::string("int"));
        map.insert(Value::Real(2.0), Value::string("real"));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&Value::Int(2)), Some(Value::string("real")));
    }
}
