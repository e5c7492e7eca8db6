//! Built-in string-keyed dict container (spec §3.4).
//!
//! Open-addressed hash table: a power-of-two `indices` array (sentinels
//! `EMPTY`/`DUMMY`) plus a dense, insertion-ordered `entries` array, modeled
//! on `original_source/lib/filterx/object-dict.c`'s `FilterXDictTable`.
//! Collision resolution is the same perturbed probe: `slot = (5*slot +
//! perturb + 1) mod size; perturb >>= 5`.

use std::sync::OnceLock;

use ahash::RandomState;

use crate::object::Object;

const EMPTY: i64 = -1;
const DUMMY: i64 = -2;

fn hasher() -> &'static RandomState {
    static HASHER: OnceLock<RandomState> = OnceLock::new();
    // Fixed seeds: stable within one process run (spec §4.1's only
    // requirement), not meant to be stable across runs or processes.
    HASHER.get_or_init(|| RandomState::with_seeds(0x5b6c_2d1f, 0x1a2b_3c4d, 0x9e37_79b9, 0x85eb_ca6b))
}

fn hash_key(key: &str) -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut h = hasher().build_hasher();
    h.write(key.as_bytes());
    h.finish()
}

#[derive(Debug, Clone)]
struct DictEntry {
    key: std::rc::Rc<str>,
    value: Object,
}

/// The built-in `dict_object` payload (spec §3.4). Wrapped by `Object::Dict`
/// together with the CoW/parent fields (see `reference.rs`).
#[derive(Debug, Clone, Default)]
pub struct DictObject {
    indices: Vec<i64>,
    entries: Vec<Option<DictEntry>>,
    used: usize,
    empties: usize,
}

impl DictObject {
    const INITIAL_INDICES: usize = 8;

    #[must_use]
    pub fn new() -> Self {
        Self { indices: vec![EMPTY; Self::INITIAL_INDICES], entries: Vec::new(), used: 0, empties: 0 }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut indices_len = Self::INITIAL_INDICES;
        while capacity * 3 > indices_len * 2 {
            indices_len *= 2;
        }
        Self { indices: vec![EMPTY; indices_len], entries: Vec::with_capacity(capacity), used: 0, empties: 0 }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn mask(&self) -> u64 {
        (self.indices.len() - 1) as u64
    }

    /// Perturbed open-addressed probe: returns the index-slot position
    /// holding `key`, if present.
    fn find_slot(&self, key: &str, hash: u64) -> Option<usize> {
        let mask = self.mask();
        let mut slot = hash & mask;
        let mut perturb = hash;
        loop {
            let entry_idx = self.indices[slot as usize];
            if entry_idx == EMPTY {
                return None;
            }
            if entry_idx != DUMMY {
                if let Some(entry) = &self.entries[entry_idx as usize] {
                    if entry.key.as_ref() == key {
                        return Some(slot as usize);
                    }
                }
            }
            slot = (5u64.wrapping_mul(slot).wrapping_add(perturb).wrapping_add(1)) & mask;
            perturb >>= 5;
        }
    }

    /// Finds the slot to insert into: reuses a `DUMMY` slot if the key isn't
    /// already present (spec §3.4's "reuses DUMMY slots on insert").
    fn find_insert_slot(&self, key: &str, hash: u64) -> (usize, bool) {
        let mask = self.mask();
        let mut slot = hash & mask;
        let mut perturb = hash;
        let mut first_dummy: Option<usize> = None;
        loop {
            let entry_idx = self.indices[slot as usize];
            if entry_idx == EMPTY {
                return (first_dummy.unwrap_or(slot as usize), false);
            }
            if entry_idx == DUMMY {
                if first_dummy.is_none() {
                    first_dummy = Some(slot as usize);
                }
            } else if let Some(entry) = &self.entries[entry_idx as usize] {
                if entry.key.as_ref() == key {
                    return (slot as usize, true);
                }
            }
            slot = (5u64.wrapping_mul(slot).wrapping_add(perturb).wrapping_add(1)) & mask;
            perturb >>= 5;
        }
    }

    fn load_factor_exceeded(&self) -> bool {
        (self.used + self.empties + 1) * 3 > self.indices.len() * 2
    }

    fn resize(&mut self) {
        let mut new_len = self.indices.len() * 2;
        while (self.used + 1) * 3 > new_len * 2 {
            new_len *= 2;
        }
        let old_entries = std::mem::take(&mut self.entries);
        self.indices = vec![EMPTY; new_len];
        self.entries = Vec::with_capacity(self.used);
        self.empties = 0;
        for entry in old_entries.into_iter().flatten() {
            let hash = hash_key(&entry.key);
            let (slot, _) = self.find_insert_slot(&entry.key, hash);
            let entry_idx = self.entries.len() as i64;
            self.indices[slot] = entry_idx;
            self.entries.push(Some(entry));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Object> {
        let hash = hash_key(key);
        let slot = self.find_slot(key, hash)?;
        let entry_idx = self.indices[slot];
        self.entries[entry_idx as usize].as_ref().map(|e| &e.value)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.find_slot(key, hash_key(key)).is_some()
    }

    /// Inserts or overwrites. Returns the previous value, if any.
    pub fn set(&mut self, key: &str, value: Object) -> Option<Object> {
        if self.load_factor_exceeded() {
            self.resize();
        }
        let hash = hash_key(key);
        let (slot, existing) = self.find_insert_slot(key, hash);
        if existing {
            let entry_idx = self.indices[slot] as usize;
            let entry = self.entries[entry_idx].as_mut().expect("existing slot always has an entry");
            return Some(std::mem::replace(&mut entry.value, value));
        }
        let entry_idx = self.entries.len() as i64;
        self.indices[slot] = entry_idx;
        self.entries.push(Some(DictEntry { key: key.into(), value }));
        self.used += 1;
        None
    }

    /// Replaces the key's old entry with an unset marker and marks its
    /// index slot `DUMMY` (spec §3.4). Returns the removed value, if any.
    pub fn unset(&mut self, key: &str) -> Option<Object> {
        let hash = hash_key(key);
        let slot = self.find_slot(key, hash)?;
        let entry_idx = self.indices[slot] as usize;
        self.indices[slot] = DUMMY;
        self.used -= 1;
        self.empties += 1;
        self.entries[entry_idx].take().map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.entries.iter().filter_map(|e| e.as_ref().map(|e| (e.key.as_ref(), &e.value)))
    }

    /// Shallow clone used by the CoW spine rebuild: new indices/entries
    /// storage, values `Object::clone`d (Rc bump, not deep-copied).
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        self.clone()
    }

    /// Replaces every occurrence of `old`'s identity with `new` in this
    /// dict's entries, by `Object` pointer identity. Used when the CoW
    /// spine rebuild installs a freshly forked child.
    pub fn replace_child_identity(&mut self, old: &Object, new: &Object) -> bool {
        let mut replaced = false;
        for entry in self.entries.iter_mut().flatten() {
            if entry.value.identity_ptr_eq(old) {
                entry.value = new.clone();
                replaced = true;
            }
        }
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut d = DictObject::new();
        d.set("a", Object::new_integer(1));
        d.set("b", Object::new_integer(2));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("a").unwrap().truthy(), true);
    }

    #[test]
    fn unset_then_reinsert_preserves_order() {
        let mut d = DictObject::new();
        d.set("a", Object::new_integer(1));
        d.set("b", Object::new_integer(2));
        d.set("c", Object::new_integer(3));
        d.unset("b");
        d.set("b", Object::new_integer(20));
        let keys: Vec<&str> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
    }

    #[test]
    fn resize_keeps_all_keys_lookupable() {
        let mut d = DictObject::new();
        for i in 0..100 {
            d.set(&format!("k{i}"), Object::new_integer(i));
        }
        for i in 0..100 {
            assert!(d.get(&format!("k{i}")).is_some(), "missing k{i}");
        }
        assert_eq!(d.len(), 100);
    }

    #[test]
    fn insert_over_existing_key_preserves_position() {
        let mut d = DictObject::new();
        d.set("a", Object::new_integer(1));
        d.set("b", Object::new_integer(2));
        d.set("a", Object::new_integer(100));
        let keys: Vec<&str> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
