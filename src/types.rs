//! Process-wide type registry (spec §3.2, §4.2).
//!
//! A `Type` is a shared, immutable descriptor: a name, an optional parent in
//! a single-chain hierarchy, and a `mutable` flag. The capability hooks
//! spec.md lists (`truthy`, `marshal`, `get_subscript`, ...) are not stored
//! as function pointers here the way the C original does it — Rust's trait
//! dispatch on `Object`/`Expr` already provides that; `Type` exists purely
//! for reflection (name lookup, identity comparison, `is_type`/`is_type_or_ref`)
//! and for expression nodes' informational type-name field (§3.6).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// A shared, process-wide type descriptor. Cheap to compare: identity is by
/// name, since one name can only be registered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub parent: Option<&'static str>,
    pub mutable: bool,
}

impl TypeDescriptor {
    #[must_use]
    pub const fn new(name: &'static str, parent: Option<&'static str>, mutable: bool) -> Self {
        Self { name, parent, mutable }
    }
}

fn registry() -> &'static Mutex<HashMap<&'static str, TypeDescriptor>> {
    static REGISTRY: OnceLock<Mutex<HashMap<&'static str, TypeDescriptor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(builtin_types()))
}

fn builtin_types() -> HashMap<&'static str, TypeDescriptor> {
    let mut m = HashMap::new();
    let defs: &[(&str, Option<&str>, bool)] = &[
        ("object", None, false),
        ("dict", Some("object"), true),
        ("list", Some("object"), true),
        ("dict_object", Some("dict"), true),
        ("list_object", Some("list"), true),
        ("string", Some("object"), false),
        ("bytes", Some("object"), false),
        ("protobuf", Some("object"), false),
        ("integer", Some("object"), false),
        ("double", Some("object"), false),
        ("boolean", Some("object"), false),
        ("null", Some("object"), false),
        ("datetime", Some("object"), false),
        ("message_value", Some("object"), false),
        ("literal", None, false),
        ("generator", None, false),
        ("literal_container", None, false),
    ];
    for &(name, parent, mutable) in defs {
        m.insert(name, TypeDescriptor::new(name, parent, mutable));
    }
    m
}

/// Registers a new type. Re-registration of an existing name is rejected
/// (spec §4.2).
///
/// # Errors
/// Returns `Err` with the existing descriptor if `name` is already registered.
pub fn register_type(descriptor: TypeDescriptor) -> Result<(), TypeDescriptor> {
    let mut reg = registry().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(existing) = reg.get(descriptor.name) {
        return Err(existing.clone());
    }
    reg.insert(descriptor.name, descriptor);
    Ok(())
}

/// Looks up a type by name.
#[must_use]
pub fn lookup_type(name: &str) -> Option<TypeDescriptor> {
    registry().lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(name).cloned()
}

/// True if `name` is `target` or a descendant of `target` in the parent chain.
#[must_use]
pub fn is_subtype(name: &str, target: &str) -> bool {
    if name == target {
        return true;
    }
    let reg = registry().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut current = reg.get(name);
    while let Some(descriptor) = current {
        if descriptor.name == target {
            return true;
        }
        current = descriptor.parent.and_then(|p| reg.get(p));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_are_registered() {
        assert!(lookup_type("dict_object").is_some());
        assert!(is_subtype("dict_object", "dict"));
        assert!(is_subtype("dict_object", "object"));
        assert!(!is_subtype("list_object", "dict"));
    }

    #[test]
    fn reregistration_is_rejected() {
        let result = register_type(TypeDescriptor::new("object", None, false));
        assert!(result.is_err());
    }
}
