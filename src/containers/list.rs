//! Built-in index-addressed list container (spec §3.5).

use crate::error::FilterxError;
use crate::object::Object;

/// Length bound from spec §3.5, used for index-normalization arithmetic.
pub const MAX_LEN: usize = 65_536;

/// The built-in `list_object` payload (spec §3.5). Wrapped by `Object::List`
/// together with the CoW/parent fields (see `reference.rs`).
#[derive(Debug, Clone, Default)]
pub struct ListObject {
    items: Vec<Object>,
}

impl ListObject {
    #[must_use]
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Normalizes a possibly-negative index against the current length.
    ///
    /// # Errors
    /// Returns an eval error if the index is out of `[-len, len)` range.
    pub fn normalize_index(&self, index: i64) -> Result<usize, FilterxError> {
        let len = self.items.len() as i64;
        let normalized = if index < 0 { index + len } else { index };
        if normalized < 0 || normalized >= len {
            return Err(FilterxError::eval("index out of range"));
        }
        Ok(normalized as usize)
    }

    #[must_use]
    pub fn get(&self, index: i64) -> Option<&Object> {
        let normalized = self.normalize_index(index).ok()?;
        self.items.get(normalized)
    }

    /// Sets the element at `index`, extending with `null` defaults if
    /// `index >= len()` (spec §3.5).
    ///
    /// # Errors
    /// Returns an eval error if the resulting length would exceed `MAX_LEN`
    /// or `index` is negative and out of range.
    pub fn set(&mut self, index: i64, value: Object) -> Result<(), FilterxError> {
        if index >= 0 {
            let index = index as usize;
            if index >= MAX_LEN {
                return Err(FilterxError::eval("index out of range"));
            }
            while self.items.len() <= index {
                self.items.push(Object::new_null());
            }
            self.items[index] = value;
            Ok(())
        } else {
            let normalized = self.normalize_index(index)?;
            self.items[normalized] = value;
            Ok(())
        }
    }

    /// # Errors
    /// Returns an eval error if the list is already at `MAX_LEN`.
    pub fn append(&mut self, value: Object) -> Result<(), FilterxError> {
        if self.items.len() >= MAX_LEN {
            return Err(FilterxError::eval("index out of range"));
        }
        self.items.push(value);
        Ok(())
    }

    /// Removes the element at `index`, shrinking the list (spec §3.5).
    ///
    /// # Errors
    /// Returns an eval error if `index` is out of range.
    pub fn unset_index(&mut self, index: i64) -> Result<Object, FilterxError> {
        let normalized = self.normalize_index(index)?;
        Ok(self.items.remove(normalized))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.items.iter()
    }

    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        self.clone()
    }

    pub fn replace_child_identity(&mut self, old: &Object, new: &Object) -> bool {
        let mut replaced = false;
        for item in &mut self.items {
            if item.identity_ptr_eq(old) {
                *item = new.clone();
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
    fn negative_index_normalizes_from_end() {
        let mut l = ListObject::new();
        l.append(Object::new_integer(1)).unwrap();
        l.append(Object::new_integer(2)).unwrap();
        l.append(Object::new_integer(3)).unwrap();
        assert_eq!(l.get(-1).unwrap().as_integer(), Some(3));
        assert_eq!(l.get(-3).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn negative_index_on_empty_list_errors() {
        let l = ListObject::new();
        assert!(l.normalize_index(-1).is_err());
    }

    #[test]
    fn set_past_end_extends_with_null() {
        let mut l = ListObject::new();
        l.set(2, Object::new_integer(9)).unwrap();
        assert_eq!(l.len(), 3);
        assert!(l.get(0).unwrap().is_type("null"));
        assert!(l.get(1).unwrap().is_type("null"));
        assert_eq!(l.get(2).unwrap().as_integer(), Some(9));
    }
}
