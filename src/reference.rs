//! Copy-on-write machinery for mutable containers (spec §3.3, §4.3).
//!
//! Rather than a generic `Ref<T>` wrapping a separately addressable raw
//! container (necessary in the C original because the base struct doesn't
//! know its own payload type), `Object`'s `Dict`/`List` variants carry the
//! two fields a `Ref` needs directly: a strong container handle and a weak
//! parent back-reference (see `DESIGN.md`, "Ref merged into Object"). The
//! free functions here implement `unwrap_rw`'s spine-rebuild algorithm
//! against that representation.
//!
//! Validated against `test_object_cow.c`'s `make_grandchild_writable`
//! scenario: writing through a forked grandchild must leave the root's
//! `format_json` output byte-identical.

use crate::error::FilterxError;
use crate::object::Object;

/// Produces a handle for `target`'s container position that is guaranteed
/// exclusively held, forking along the parent chain as needed.
///
/// Two independent conditions can require work:
/// 1. `target`'s *position* (its `Object` identity) is reachable from more
///    than the caller's own handle, because an ancestor fork aliased it into
///    two parents. Resolved by giving the position a fresh identity,
///    installed into the (now-exclusive) parent in place of the old one.
/// 2. `target`'s own container handle (the `Rc<RefCell<_>>` payload) is
///    shared with another `Object`, e.g. right after `cow_fork`. Resolved by
///    swapping the container in place — the `Object` identity never changes
///    for this case, so callers whose only handle is the top of a chain
///    never need to replace their own variable.
///
/// Callers that mutate a container must call this first and adopt the
/// returned handle (mutating methods on `Object` take `&mut self` and do
/// this internally).
pub(crate) fn prepare_for_write(target: &Object) -> Result<Object, FilterxError> {
    let effective_target = match target.parent_object() {
        Some(parent) if container_is_shared(&parent) => {
            let fresh_parent = prepare_for_write(&parent)?;
            let fresh_target = target.duplicate_identity();
            fresh_target.set_parent(&fresh_parent);
            fresh_parent.replace_child_identity(target, &fresh_target)?;
            fresh_target
        }
        _ => target.clone(),
    };

    if container_is_shared(&effective_target) {
        effective_target.fork_own_container_in_place()?;
    }

    Ok(effective_target)
}

fn container_is_shared(obj: &Object) -> bool {
    obj.container_strong_count().is_some_and(|count| count > 1)
}

/// `cow_fork`: produces a new handle that currently shares the same inner
/// container as `obj`. The new handle has no parent yet (spec §4.3); the
/// first write through either handle triggers the unshare in
/// `prepare_for_write`.
///
/// # Errors
/// Returns an error if `obj` is not a container type.
pub fn cow_fork(obj: &Object) -> Result<Object, FilterxError> {
    obj.duplicate_identity_detached()
}

/// `cow_store`: called when inserting `value` into `container`'s entries.
/// Re-homes `value`'s parent back-reference to `container` (spec §4.3's
/// "set the stored child's parent back-reference to the new container").
pub fn cow_store(container: &Object, value: Object) -> Object {
    value.set_parent(container);
    value
}

/// `ref_values_equal`: true when `a` and `b` are the same `Object` handle or
/// both wrap the same inner container (used to find the "child of
/// interest" during cloning, spec §4.3).
#[must_use]
pub fn ref_values_equal(a: &Object, b: &Object) -> bool {
    if a.identity_ptr_eq(b) {
        return true;
    }
    match (a.container_rc_ptr(), b.container_rc_ptr()) {
        (Some(pa), Some(pb)) => pa == pb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn fork_on_sibling_write_leaves_root_untouched() {
        let root = Object::from_json(
            r#"{"a":"a","b":"b","c":{"ca":"ca","cb":"cb","cc":{"cca":"cca","ccb":"ccb","ccc":"ccc"}}}"#,
        )
        .unwrap();
        let c = root.getattr("c").unwrap();
        let c_prime = cow_fork(&c).unwrap();
        assert!(!c.identity_ptr_eq(&c_prime));
        assert!(ref_values_equal(&c.unwrap_ro().unwrap(), &c_prime.unwrap_ro().unwrap()));

        let mut cc = c_prime.getattr("cc").unwrap();
        cc.setattr("ccc", Object::new_string("ccc-changed")).unwrap();

        let orig_json = root.format_json().unwrap();
        assert_eq!(orig_json, r#"{"a":"a","b":"b","c":{"ca":"ca","cb":"cb","cc":{"cca":"cca","ccb":"ccb","ccc":"ccc"}}}"#);
    }
}
