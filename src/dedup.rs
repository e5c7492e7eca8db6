//! Dedup storage: canonicalizes repeated immutable leaf values during an
//! `Object::dedup` walk (spec §4.1, GLOSSARY "Dedup storage").
//!
//! Grounded on `func-cache-json-file.c`'s `_deduplicate_key_values`, which
//! builds a short-lived `GHashTable` keyed by the marshaled string content
//! and throws it away once the walk over one cached document finishes.

use std::collections::HashMap;

use crate::object::Object;

/// Byte-content key derived from `Object::marshal`, used to look up a
/// previously-seen canonical representative regardless of how the original
/// was constructed (two distinct strings with the same bytes dedup to one).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey(Vec<u8>, String);

/// Short-lived canonicalization map for one `dedup` traversal (spec §4.1).
#[derive(Debug, Default)]
pub struct DedupStorage {
    canonical: HashMap<DedupKey, Object, ahash::RandomState>,
}

impl DedupStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up or installs `candidate` as the canonical representative for
    /// its marshaled content. Mutable containers are never deduplicated —
    /// callers only pass immutable leaf values (spec §4.1).
    #[must_use]
    pub fn canonicalize(&mut self, candidate: &Object) -> Object {
        let Ok((bytes, value_type)) = candidate.marshal() else {
            return candidate.clone();
        };
        let key = DedupKey(bytes, value_type.to_string());
        self.canonical.entry(key).or_insert_with(|| candidate.clone()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_strings_canonicalize_to_one_object() {
        let mut storage = DedupStorage::new();
        let a = Object::new_string("same");
        let b = Object::new_string("same");
        let ca = storage.canonicalize(&a);
        let cb = storage.canonicalize(&b);
        assert!(ca.identity_ptr_eq(&cb));
    }

    #[test]
    fn second_dedup_pass_is_a_no_op() {
        let mut storage = DedupStorage::new();
        let a = Object::new_string("x");
        let first = storage.canonicalize(&a);
        let second = storage.canonicalize(&first);
        assert!(first.identity_ptr_eq(&second));
    }
}
