//! The polymorphic FilterX value (spec §3.1, §3.2, §4.1).
//!
//! `Object` is a thin handle, `Rc<ObjectInner>`; the manual `ref`/`unref`
//! pair from the source becomes ordinary `Clone`/`Drop`. Mutable containers
//! (`Dict`/`List`) carry their copy-on-write fields directly on the variant
//! rather than through a separate wrapper type — see `DESIGN.md`, "Ref
//! merged into Object" — so every operation in this file that only makes
//! sense for containers (`get_subscript`, `setattr`, ...) fails in a typed
//! way on atoms, per spec §9's "methods that don't apply to a type must
//! fail in a typed way" rule.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, SecondsFormat, Utc};
use strum::{Display, EnumString};

use crate::containers::{DictObject, ListObject};
use crate::dedup::DedupStorage;
use crate::error::{FilterxError, RunResult};
use crate::reference;

/// Marshal type tag (spec §4.1's "a fixed enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ValueType {
    #[strum(serialize = "LM_VT_STRING")]
    String,
    #[strum(serialize = "LM_VT_JSON")]
    Json,
    #[strum(serialize = "LM_VT_LIST")]
    List,
    #[strum(serialize = "LM_VT_INTEGER")]
    Integer,
    #[strum(serialize = "LM_VT_DOUBLE")]
    Double,
    #[strum(serialize = "LM_VT_BOOLEAN")]
    Boolean,
    #[strum(serialize = "LM_VT_NULL")]
    Null,
    #[strum(serialize = "LM_VT_DATETIME")]
    Datetime,
    #[strum(serialize = "LM_VT_BYTES")]
    Bytes,
    #[strum(serialize = "LM_VT_PROTOBUF")]
    Protobuf,
}

enum ObjectData {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Protobuf(Rc<[u8]>),
    Datetime(DateTime<Utc>),
    MessageValue(Rc<str>, ValueType),
    Dict(Rc<RefCell<DictObject>>),
    List(Rc<RefCell<ListObject>>),
}

impl Clone for ObjectData {
    fn clone(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Boolean(b) => Self::Boolean(*b),
            Self::Integer(i) => Self::Integer(*i),
            Self::Double(d) => Self::Double(*d),
            Self::String(s) => Self::String(Rc::clone(s)),
            Self::Bytes(b) => Self::Bytes(Rc::clone(b)),
            Self::Protobuf(b) => Self::Protobuf(Rc::clone(b)),
            Self::Datetime(d) => Self::Datetime(*d),
            Self::MessageValue(s, t) => Self::MessageValue(Rc::clone(s), *t),
            Self::Dict(d) => Self::Dict(Rc::clone(d)),
            Self::List(l) => Self::List(Rc::clone(l)),
        }
    }
}

struct ObjectInner {
    data: RefCell<ObjectData>,
    freeze_count: Cell<u32>,
    /// Self-held clone on the 0→1 freeze transition; see `DESIGN.md`
    /// "Freeze via self-held clone".
    freeze_holder: RefCell<Option<Object>>,
    readonly: Cell<bool>,
    parent: RefCell<Option<Weak<ObjectInner>>>,
}

/// The universal FilterX value (spec §3.1).
pub struct Object(Rc<ObjectInner>);

impl Clone for Object {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.type_name())
    }
}

fn new_inner(data: ObjectData) -> Object {
    Object(Rc::new(ObjectInner {
        data: RefCell::new(data),
        freeze_count: Cell::new(0),
        freeze_holder: RefCell::new(None),
        readonly: Cell::new(false),
        parent: RefCell::new(None),
    }))
}

// --- Construction -----------------------------------------------------

impl Object {
    #[must_use]
    pub fn new_null() -> Self {
        new_inner(ObjectData::Null)
    }

    #[must_use]
    pub fn new_bool(value: bool) -> Self {
        new_inner(ObjectData::Boolean(value))
    }

    #[must_use]
    pub fn new_integer(value: i64) -> Self {
        new_inner(ObjectData::Integer(value))
    }

    #[must_use]
    pub fn new_double(value: f64) -> Self {
        new_inner(ObjectData::Double(value))
    }

    #[must_use]
    pub fn new_string(value: impl Into<Rc<str>>) -> Self {
        new_inner(ObjectData::String(value.into()))
    }

    #[must_use]
    pub fn new_bytes(value: impl Into<Rc<[u8]>>) -> Self {
        new_inner(ObjectData::Bytes(value.into()))
    }

    #[must_use]
    pub fn new_protobuf(value: impl Into<Rc<[u8]>>) -> Self {
        new_inner(ObjectData::Protobuf(value.into()))
    }

    #[must_use]
    pub fn new_datetime(value: DateTime<Utc>) -> Self {
        new_inner(ObjectData::Datetime(value))
    }

    #[must_use]
    pub fn new_message_value(value: impl Into<Rc<str>>, lm_type: ValueType) -> Self {
        new_inner(ObjectData::MessageValue(value.into(), lm_type))
    }

    #[must_use]
    pub fn new_dict() -> Self {
        Self::from_dict(DictObject::new())
    }

    #[must_use]
    pub fn from_dict(dict: DictObject) -> Self {
        new_inner(ObjectData::Dict(Rc::new(RefCell::new(dict))))
    }

    #[must_use]
    pub fn new_list() -> Self {
        Self::from_list(ListObject::new())
    }

    #[must_use]
    pub fn from_list(list: ListObject) -> Self {
        new_inner(ObjectData::List(Rc::new(RefCell::new(list))))
    }

    /// Builds an object tree from a JSON document (`object_from_json`, §6.1).
    ///
    /// # Errors
    /// Returns an eval error on malformed JSON.
    pub fn from_json(text: &str) -> RunResult<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FilterxError::eval("JSON parse failure").with_detail(e.to_string()))?;
        Self::from_json_value(&value)
    }

    fn from_json_value(value: &serde_json::Value) -> RunResult<Self> {
        Ok(match value {
            serde_json::Value::Null => Self::new_null(),
            serde_json::Value::Bool(b) => Self::new_bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::new_integer(i)
                } else {
                    Self::new_double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::new_string(s.as_str()),
            serde_json::Value::Array(items) => {
                let mut list = ListObject::with_capacity(items.len());
                for item in items {
                    list.append(Self::from_json_value(item)?)?;
                }
                let obj = Self::from_list(list);
                obj.reparent_container_children();
                obj
            }
            serde_json::Value::Object(map) => {
                let mut dict = DictObject::with_capacity(map.len());
                for (k, v) in map {
                    dict.set(k, Self::from_json_value(v)?);
                }
                let obj = Self::from_dict(dict);
                obj.reparent_container_children();
                obj
            }
        })
    }

    /// Sets every currently-stored child's parent back-reference to `self`.
    /// Used right after building a container so CoW walks have a starting
    /// point (spec §4.3, `cow_store`).
    fn reparent_container_children(&self) {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => {
                for (_, v) in d.borrow().iter() {
                    v.set_parent(self);
                }
            }
            ObjectData::List(l) => {
                for v in l.borrow().iter() {
                    v.set_parent(self);
                }
            }
            _ => {}
        }
    }
}

// --- Type reflection ----------------------------------------------------

impl Object {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match &*self.0.data.borrow() {
            ObjectData::Null => "null",
            ObjectData::Boolean(_) => "boolean",
            ObjectData::Integer(_) => "integer",
            ObjectData::Double(_) => "double",
            ObjectData::String(_) => "string",
            ObjectData::Bytes(_) => "bytes",
            ObjectData::Protobuf(_) => "protobuf",
            ObjectData::Datetime(_) => "datetime",
            ObjectData::MessageValue(..) => "message_value",
            ObjectData::Dict(_) => "dict_object",
            ObjectData::List(_) => "list_object",
        }
    }

    /// `is_type`: exact or ancestor type-name match (spec §4.1).
    #[must_use]
    pub fn is_type(&self, name: &str) -> bool {
        crate::types::is_subtype(self.type_name(), name)
    }

    /// `is_type_or_ref`: identical to `is_type` here since `Ref` is merged
    /// into `Object` (no separate wrapper type to look through).
    #[must_use]
    pub fn is_type_or_ref(&self, name: &str) -> bool {
        self.is_type(name)
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

// --- Refcount / freeze / readonly ---------------------------------------

impl Object {
    /// Increments the freeze count; on the 0→1 transition, transitively
    /// freezes reachable children and keeps this object alive independent
    /// of external refcounting (spec §3.1 invariant 3).
    pub fn freeze(&self) {
        let was_zero = self.0.freeze_count.get() == 0;
        self.0.freeze_count.set(self.0.freeze_count.get() + 1);
        if was_zero {
            *self.0.freeze_holder.borrow_mut() = Some(self.clone());
            match &*self.0.data.borrow() {
                ObjectData::Dict(d) => {
                    for (_, v) in d.borrow().iter() {
                        v.freeze();
                    }
                }
                ObjectData::List(l) => {
                    for v in l.borrow().iter() {
                        v.freeze();
                    }
                }
                _ => {}
            }
        }
    }

    /// Decrements the freeze count; at 0, releases the self-held clone.
    pub fn unfreeze_and_free(&self) {
        let count = self.0.freeze_count.get();
        if count == 0 {
            return;
        }
        self.0.freeze_count.set(count - 1);
        if count == 1 {
            match &*self.0.data.borrow() {
                ObjectData::Dict(d) => {
                    for (_, v) in d.borrow().iter() {
                        v.unfreeze_and_free();
                    }
                }
                ObjectData::List(l) => {
                    for v in l.borrow().iter() {
                        v.unfreeze_and_free();
                    }
                }
                _ => {}
            }
            *self.0.freeze_holder.borrow_mut() = None;
        }
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.freeze_count.get() > 0
    }

    pub fn make_readonly(&self) {
        self.0.readonly.set(true);
    }

    #[must_use]
    pub fn is_readonly(&self) -> bool {
        self.0.readonly.get()
    }

    /// Walks `self` and its parent-container chain; fails if any of them is
    /// readonly (spec §4.1's "Readonly propagation").
    pub(crate) fn check_writable(&self) -> RunResult<()> {
        if self.is_readonly() {
            return Err(FilterxError::eval("readonly"));
        }
        let mut current = self.parent_object();
        while let Some(parent) = current {
            if parent.is_readonly() {
                return Err(FilterxError::eval("readonly"));
            }
            current = parent.parent_object();
        }
        Ok(())
    }
}

// --- Parent back-reference / CoW plumbing (used by reference.rs) -------

impl Object {
    #[must_use]
    pub(crate) fn parent_object(&self) -> Option<Self> {
        self.0.parent.borrow().as_ref().and_then(Weak::upgrade).map(Object)
    }

    pub(crate) fn set_parent(&self, parent: &Self) {
        *self.0.parent.borrow_mut() = Some(Rc::downgrade(&parent.0));
    }

    #[must_use]
    pub(crate) fn identity_ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub(crate) fn container_rc_ptr(&self) -> Option<usize> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => Some(Rc::as_ptr(d) as usize),
            ObjectData::List(l) => Some(Rc::as_ptr(l) as usize),
            _ => None,
        }
    }

    #[must_use]
    pub(crate) fn container_strong_count(&self) -> Option<usize> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => Some(Rc::strong_count(d)),
            ObjectData::List(l) => Some(Rc::strong_count(l)),
            _ => None,
        }
    }

    /// Produces a new `Object` identity sharing the same container payload
    /// as `self` (used by the CoW spine rebuild to detach a forked
    /// position's identity from the one still reachable via the old path).
    #[must_use]
    pub(crate) fn duplicate_identity(&self) -> Self {
        new_inner(self.0.data.borrow().clone())
    }

    /// `cow_fork`: like `duplicate_identity` but requires a container type
    /// and leaves the parent back-reference unset (spec §4.3).
    pub(crate) fn duplicate_identity_detached(&self) -> RunResult<Self> {
        if self.container_strong_count().is_none() {
            return Err(FilterxError::eval("method not supported").with_detail("cow_fork on a non-container type"));
        }
        Ok(self.duplicate_identity())
    }

    /// Swaps this object's own container payload in place for a fresh,
    /// exclusively-held clone (spec §4.3's in-place unshare for the
    /// chain-top node).
    pub(crate) fn fork_own_container_in_place(&self) -> RunResult<()> {
        let mut data = self.0.data.borrow_mut();
        match &*data {
            ObjectData::Dict(d) => {
                let cloned = d.borrow().shallow_clone();
                let fresh = Rc::new(RefCell::new(cloned));
                for (_, v) in fresh.borrow().iter() {
                    v.set_parent(self);
                }
                *data = ObjectData::Dict(fresh);
                Ok(())
            }
            ObjectData::List(l) => {
                let cloned = l.borrow().shallow_clone();
                let fresh = Rc::new(RefCell::new(cloned));
                for v in fresh.borrow().iter() {
                    v.set_parent(self);
                }
                *data = ObjectData::List(fresh);
                Ok(())
            }
            _ => Err(FilterxError::internal("fork_own_container_in_place on a non-container type")),
        }
    }

    /// Replaces every occurrence of `old`'s identity in this object's own
    /// container entries with `new` (spec §4.3 step 3).
    pub(crate) fn replace_child_identity(&self, old: &Self, new: &Self) -> RunResult<()> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => {
                d.borrow_mut().replace_child_identity(old, new);
                Ok(())
            }
            ObjectData::List(l) => {
                l.borrow_mut().replace_child_identity(old, new);
                Ok(())
            }
            _ => Err(FilterxError::internal("replace_child_identity on a non-container type")),
        }
    }

    /// `unwrap_ro`: returns a handle to the shared inner container; may be
    /// aliased (spec §4.3). `Ref` being merged into `Object`, this is just
    /// `self.clone()`.
    ///
    /// # Errors
    /// Returns an error if `self` is not a container type.
    pub fn unwrap_ro(&self) -> RunResult<Self> {
        if self.container_strong_count().is_none() {
            return Err(FilterxError::eval("method not supported").with_detail("unwrap_ro on a non-container type"));
        }
        Ok(self.clone())
    }

    /// `unwrap_rw`: guarantees an exclusive inner container, forking on
    /// demand (spec §4.3).
    ///
    /// # Errors
    /// Returns an error if `self` is not a container type, or if the
    /// readonly chain rejects the write.
    pub fn unwrap_rw(&self) -> RunResult<Self> {
        self.check_writable()?;
        if self.container_strong_count().is_none() {
            return Err(FilterxError::eval("method not supported").with_detail("unwrap_rw on a non-container type"));
        }
        reference::prepare_for_write(self)
    }

    /// `clone_container(parent, child_of_interest)` (spec §4.1, §4.3):
    /// shallow-clones this container's entries. `child_of_interest` is
    /// accepted for API parity with the spec; this implementation never
    /// deep-clones entries regardless (every entry is aliased by `Object`
    /// handle, consistent with "leave un-cloned, inherits the passed-in
    /// identity" for every entry, not only the designated one).
    ///
    /// # Errors
    /// Returns an error if `self` is not a container type.
    pub fn clone_container(&self, _child_of_interest: Option<&Self>) -> RunResult<Self> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => Ok(Self::from_dict(d.borrow().shallow_clone())),
            ObjectData::List(l) => Ok(Self::from_list(l.borrow().shallow_clone())),
            _ => Err(FilterxError::eval("method not supported").with_detail("clone_container on a non-container type")),
        }
    }
}

// --- Value-level clone / dedup -------------------------------------------

impl Object {
    /// `clone`: default value-copy. Atoms copy trivially; containers get a
    /// shallow structural clone (spec §4.1: "for mutable containers,
    /// `clone_container` deep-clones").
    #[must_use]
    pub fn clone_value(&self) -> Self {
        match &*self.0.data.borrow() {
            ObjectData::Dict(_) | ObjectData::List(_) => {
                self.clone_container(None).expect("container branch already matched")
            }
            other => new_inner(other.clone()),
        }
    }

    /// Walks `self`, canonicalizing immutable children against `storage`
    /// (spec §4.1's dedup description; mutable containers are never
    /// themselves deduplicated, only their immutable interior values).
    #[must_use]
    pub fn dedup(&self, storage: &mut DedupStorage) -> Self {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => {
                let keys_values: Vec<(String, Self)> = d.borrow().iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
                let mut dict = d.borrow_mut();
                for (k, v) in keys_values {
                    let deduped = v.dedup(storage);
                    dict.set(&k, deduped);
                }
                self.clone()
            }
            ObjectData::List(l) => {
                let items: Vec<Self> = l.borrow().iter().cloned().collect();
                let mut list = l.borrow_mut();
                for (i, v) in items.into_iter().enumerate() {
                    let deduped = v.dedup(storage);
                    list.set(i as i64, deduped).expect("index within current bounds");
                }
                self.clone()
            }
            _ => storage.canonicalize(self),
        }
    }
}

// --- truthy / len / marshal / repr / str / format_json -------------------

impl Object {
    #[must_use]
    pub fn truthy(&self) -> bool {
        match &*self.0.data.borrow() {
            ObjectData::Null => false,
            ObjectData::Boolean(b) => *b,
            ObjectData::Integer(i) => *i != 0,
            ObjectData::Double(d) => *d != 0.0,
            ObjectData::String(s) => !s.is_empty(),
            ObjectData::Bytes(b) => !b.is_empty(),
            ObjectData::Protobuf(b) => !b.is_empty(),
            ObjectData::Datetime(_) => true,
            ObjectData::MessageValue(s, _) => !s.is_empty(),
            ObjectData::Dict(d) => !d.borrow().is_empty(),
            ObjectData::List(l) => !l.borrow().is_empty(),
        }
    }

    /// # Errors
    /// Returns an error if `self` has no notion of length (atoms other than
    /// strings/bytes).
    pub fn len(&self) -> RunResult<u64> {
        match &*self.0.data.borrow() {
            ObjectData::String(s) => Ok(s.len() as u64),
            ObjectData::Bytes(b) | ObjectData::Protobuf(b) => Ok(b.len() as u64),
            ObjectData::MessageValue(s, _) => Ok(s.len() as u64),
            ObjectData::Dict(d) => Ok(d.borrow().len() as u64),
            ObjectData::List(l) => Ok(l.borrow().len() as u64),
            _ => Err(FilterxError::eval("method not supported").with_detail("len on a type with no length")),
        }
    }

    /// # Errors
    /// Never fails for the current variant set; kept fallible for parity
    /// with `object_marshal`'s signature (spec §6.1).
    pub fn marshal(&self) -> RunResult<(Vec<u8>, ValueType)> {
        match &*self.0.data.borrow() {
            ObjectData::Null => Ok((Vec::new(), ValueType::Null)),
            ObjectData::Boolean(b) => Ok((vec![u8::from(*b)], ValueType::Boolean)),
            ObjectData::Integer(i) => Ok((i.to_le_bytes().to_vec(), ValueType::Integer)),
            ObjectData::Double(d) => Ok((d.to_le_bytes().to_vec(), ValueType::Double)),
            ObjectData::String(s) => Ok((s.as_bytes().to_vec(), ValueType::String)),
            ObjectData::MessageValue(s, _) => Ok((s.as_bytes().to_vec(), ValueType::String)),
            ObjectData::Bytes(b) => Ok((b.to_vec(), ValueType::Bytes)),
            ObjectData::Protobuf(b) => Ok((b.to_vec(), ValueType::Protobuf)),
            ObjectData::Datetime(dt) => Ok((dt.timestamp_nanos_opt().unwrap_or(0).to_le_bytes().to_vec(), ValueType::Datetime)),
            ObjectData::List(l) => {
                let list = l.borrow();
                let all_strings = list.iter().all(|item| item.is_type("string"));
                if all_strings {
                    let joined = list
                        .iter()
                        .map(|item| item.str_repr().replace('\\', "\\\\").replace(',', "\\,"))
                        .collect::<Vec<_>>()
                        .join(",");
                    Ok((joined.into_bytes(), ValueType::List))
                } else {
                    Ok((self.format_json()?.into_bytes(), ValueType::Json))
                }
            }
            ObjectData::Dict(_) => Ok((self.format_json()?.into_bytes(), ValueType::Json)),
        }
    }

    /// Developer-facing representation.
    #[must_use]
    pub fn repr(&self) -> String {
        match &*self.0.data.borrow() {
            ObjectData::String(s) | ObjectData::MessageValue(s, _) => format!("{s:?}"),
            ObjectData::Bytes(b) | ObjectData::Protobuf(b) => format!("b{:?}", String::from_utf8_lossy(b)),
            _ => self.str_repr(),
        }
    }

    /// User-facing representation.
    #[must_use]
    pub fn str_repr(&self) -> String {
        match &*self.0.data.borrow() {
            ObjectData::Null => "null".to_owned(),
            ObjectData::Boolean(b) => b.to_string(),
            ObjectData::Integer(i) => i.to_string(),
            ObjectData::Double(d) => {
                let mut buf = ryu::Buffer::new();
                buf.format(*d).to_owned()
            }
            ObjectData::String(s) | ObjectData::MessageValue(s, _) => s.to_string(),
            ObjectData::Bytes(b) | ObjectData::Protobuf(b) => String::from_utf8_lossy(b).into_owned(),
            ObjectData::Datetime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            ObjectData::Dict(_) | ObjectData::List(_) => self.format_json().unwrap_or_default(),
        }
    }

    /// `format_json`: emits syntactically valid JSON for every object
    /// (spec invariant 8.1.8).
    ///
    /// # Errors
    /// Never fails for the current variant set; kept fallible since
    /// container children could in principle reject formatting.
    pub fn format_json(&self) -> RunResult<String> {
        let mut out = String::new();
        self.write_json(&mut out)?;
        Ok(out)
    }

    fn write_json(&self, out: &mut String) -> RunResult<()> {
        match &*self.0.data.borrow() {
            ObjectData::Null => out.push_str("null"),
            ObjectData::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
            ObjectData::Integer(i) => out.push_str(&i.to_string()),
            ObjectData::Double(d) => {
                let mut buf = ryu::Buffer::new();
                out.push_str(buf.format(*d));
            }
            ObjectData::String(s) | ObjectData::MessageValue(s, _) => {
                out.push_str(&json_escape(s));
            }
            ObjectData::Bytes(b) | ObjectData::Protobuf(b) => {
                out.push_str(&json_escape(&String::from_utf8_lossy(b)));
            }
            ObjectData::Datetime(dt) => out.push_str(&json_escape(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))),
            ObjectData::Dict(d) => {
                out.push('{');
                for (i, (k, v)) in d.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&json_escape(k));
                    out.push(':');
                    v.write_json(out)?;
                }
                out.push('}');
            }
            ObjectData::List(l) => {
                out.push('[');
                for (i, v) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    v.write_json(out)?;
                }
                out.push(']');
            }
        }
        Ok(())
    }
}

fn json_escape(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_owned())
}

// --- Subscript / attribute access ----------------------------------------

impl Object {
    /// # Errors
    /// Returns an error if `self` is not a container, or the key type
    /// doesn't match (string for dict, integer for list), or the key/index
    /// isn't found/out of range.
    pub fn get_subscript(&self, key: &Self) -> RunResult<Self> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => {
                let ObjectData::String(k) | ObjectData::MessageValue(k, _) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("non-string dict key"));
                };
                let value = d.borrow().get(k).cloned().ok_or_else(|| FilterxError::eval("key not set"))?;
                value.set_parent(self);
                Ok(value)
            }
            ObjectData::List(l) => {
                let ObjectData::Integer(i) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("list index must be an integer"));
                };
                let value = l.borrow().get(*i).cloned().ok_or_else(|| FilterxError::eval("index out of range"))?;
                value.set_parent(self);
                Ok(value)
            }
            _ => Err(FilterxError::eval("method not supported").with_detail("get_subscript on a non-container type")),
        }
    }

    /// # Errors
    /// Returns an error if `self` is not a container, the key type doesn't
    /// match, the readonly chain rejects the write, or the list index is
    /// out of bounds.
    pub fn set_subscript(&mut self, key: &Self, value: Self) -> RunResult<()> {
        self.check_writable()?;
        let target = self.unwrap_rw()?;
        match &*target.0.data.borrow() {
            ObjectData::Dict(d) => {
                let ObjectData::String(k) | ObjectData::MessageValue(k, _) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("non-string dict key"));
                };
                let stored = reference::cow_store(&target, value);
                d.borrow_mut().set(k, stored);
            }
            ObjectData::List(l) => {
                let ObjectData::Integer(i) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("list index must be an integer"));
                };
                let stored = reference::cow_store(&target, value);
                l.borrow_mut().set(*i, stored)?;
            }
            _ => return Err(FilterxError::eval("method not supported").with_detail("set_subscript on a non-container type")),
        }
        *self = target;
        Ok(())
    }

    /// List-only: appends `value` at the end (spec §4.7's generator merge,
    /// `expr-plus-generator.c`'s list-flattening path).
    ///
    /// # Errors
    /// Returns an error if `self` is not a list, the readonly chain rejects
    /// the write, or the list is already at its length cap.
    pub fn append(&mut self, value: Self) -> RunResult<()> {
        self.check_writable()?;
        let target = self.unwrap_rw()?;
        match &*target.0.data.borrow() {
            ObjectData::List(l) => {
                let stored = reference::cow_store(&target, value);
                l.borrow_mut().append(stored)?;
            }
            _ => return Err(FilterxError::eval("method not supported").with_detail("append on a non-list type")),
        }
        *self = target;
        Ok(())
    }

    /// List-only: removes the element at `index`, shrinking the list and
    /// clearing the removed child's parent back-reference (spec §3.5).
    ///
    /// # Errors
    /// Returns an error if `self` is not a list, the readonly chain rejects
    /// the write, or `index` is out of range.
    pub fn unset_index(&mut self, index: i64) -> RunResult<Self> {
        self.check_writable()?;
        let target = self.unwrap_rw()?;
        let removed = match &*target.0.data.borrow() {
            ObjectData::List(l) => l.borrow_mut().unset_index(index)?,
            _ => return Err(FilterxError::eval("method not supported").with_detail("unset_index on a non-list type")),
        };
        *removed.0.parent.borrow_mut() = None;
        *self = target;
        Ok(removed)
    }

    /// Dict-only: is `key` present (distinct from "set to null", spec §9
    /// supplement B).
    ///
    /// # Errors
    /// Returns an error if `self` is not a dict or `key` isn't a string.
    pub fn is_key_set(&self, key: &Self) -> RunResult<bool> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => {
                let ObjectData::String(k) | ObjectData::MessageValue(k, _) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("non-string dict key"));
                };
                Ok(d.borrow().contains_key(k))
            }
            _ => Err(FilterxError::eval("method not supported").with_detail("is_key_set on a non-dict type")),
        }
    }

    /// Unlike `set_subscript`/`setattr`, a readonly violation here returns
    /// `Ok(false)` rather than `Err` (spec §8.4's boundary case: "readonly
    /// dict: unset_key returns false ... the dict's length is unchanged"),
    /// matching the original's `gboolean`-returning `unset_key` hook which
    /// reports failure through its return value rather than propagating an
    /// exception.
    ///
    /// # Errors
    /// Returns an error if `self` is not a dict or `key` isn't a string.
    pub fn unset_key(&mut self, key: &Self) -> RunResult<bool> {
        if self.check_writable().is_err() {
            return Ok(false);
        }
        let target = self.unwrap_rw()?;
        let removed = match &*target.0.data.borrow() {
            ObjectData::Dict(d) => {
                let ObjectData::String(k) | ObjectData::MessageValue(k, _) = &*key.0.data.borrow() else {
                    return Err(FilterxError::eval("non-string dict key"));
                };
                let removed = d.borrow_mut().unset(k);
                if let Some(child) = &removed {
                    *child.0.parent.borrow_mut() = None;
                }
                removed.is_some()
            }
            _ => return Err(FilterxError::eval("method not supported").with_detail("unset_key on a non-dict type")),
        };
        *self = target;
        Ok(removed)
    }

    /// Attribute access sugar over `get_subscript` with a string key
    /// (dicts only).
    ///
    /// # Errors
    /// Returns an error if `self` is not a dict or `name` isn't set.
    pub fn getattr(&self, name: &str) -> RunResult<Self> {
        self.get_subscript(&Self::new_string(name))
    }

    /// # Errors
    /// Returns an error if `self` is not a dict or the readonly chain
    /// rejects the write.
    pub fn setattr(&mut self, name: &str, value: Self) -> RunResult<()> {
        let key = Self::new_string(name);
        self.set_subscript(&key, value)
    }

    /// Snapshots a dict's current key/value pairs in iteration order (used
    /// by generator merge, spec §4.7; not part of the spec's core surface,
    /// just a read helper over `get_subscript`'s storage).
    ///
    /// # Errors
    /// Returns an error if `self` is not a dict.
    pub fn dict_items(&self) -> RunResult<Vec<(String, Self)>> {
        match &*self.0.data.borrow() {
            ObjectData::Dict(d) => Ok(d.borrow().iter().map(|(k, v)| (k.to_owned(), v.clone())).collect()),
            _ => Err(FilterxError::eval("method not supported").with_detail("dict_items on a non-dict type")),
        }
    }

    /// Snapshots a list's current elements in order (used by generator
    /// merge, spec §4.7).
    ///
    /// # Errors
    /// Returns an error if `self` is not a list.
    pub fn list_items(&self) -> RunResult<Vec<Self>> {
        match &*self.0.data.borrow() {
            ObjectData::List(l) => Ok(l.borrow().iter().cloned().collect()),
            _ => Err(FilterxError::eval("method not supported").with_detail("list_items on a non-list type")),
        }
    }

    /// Folds `get_subscript`/`getattr` through a sequence of string/integer
    /// keys, short-circuiting at the first failure (spec §9 supplement B,
    /// grounded on `func-path-lookup.c`).
    ///
    /// # Errors
    /// Returns the first failing lookup's error.
    pub fn path_lookup(&self, keys: &[Self]) -> RunResult<Self> {
        let mut current = self.clone();
        for key in keys {
            current = current.get_subscript(key)?;
        }
        Ok(current)
    }
}

// --- Arithmetic ------------------------------------------------------------

impl Object {
    /// `add(other)` (spec §4.1, §4.8): string concatenation, numeric
    /// addition, or dict merge (clone lhs, merge rhs's entries).
    ///
    /// # Errors
    /// Returns an error if the two operands have no defined `+`.
    pub fn add(&self, other: &Self) -> RunResult<Self> {
        let lhs = self.0.data.borrow();
        let rhs = other.0.data.borrow();
        match (&*lhs, &*rhs) {
            (ObjectData::String(a), ObjectData::String(b)) => Ok(Self::new_string(format!("{a}{b}"))),
            (ObjectData::Integer(a), ObjectData::Integer(b)) => Ok(Self::new_integer(a.wrapping_add(*b))),
            (ObjectData::Double(a), ObjectData::Double(b)) => Ok(Self::new_double(a + b)),
            (ObjectData::Integer(a), ObjectData::Double(b)) => Ok(Self::new_double(*a as f64 + b)),
            (ObjectData::Double(a), ObjectData::Integer(b)) => Ok(Self::new_double(a + *b as f64)),
            (ObjectData::Dict(a), ObjectData::Dict(b)) => {
                let mut merged = a.borrow().shallow_clone();
                for (k, v) in b.borrow().iter() {
                    merged.set(k, v.clone());
                }
                drop(lhs);
                drop(rhs);
                Ok(Self::from_dict(merged))
            }
            (ObjectData::List(a), ObjectData::List(b)) => {
                let mut merged = a.borrow().shallow_clone();
                for v in b.borrow().iter() {
                    merged.append(v.clone()).ok();
                }
                drop(lhs);
                drop(rhs);
                Ok(Self::from_list(merged))
            }
            _ => Err(FilterxError::eval("method not supported").with_detail("add between incompatible types")),
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match &*self.0.data.borrow() {
            ObjectData::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string(&self) -> Option<Rc<str>> {
        match &*self.0.data.borrow() {
            ObjectData::String(s) | ObjectData::MessageValue(s, _) => Some(Rc::clone(s)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_dict_json() {
        let obj = Object::from_json(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(obj.format_json().unwrap(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn readonly_blocks_mutation() {
        let mut obj = Object::new_dict();
        obj.make_readonly();
        let result = obj.set_subscript(&Object::new_string("a"), Object::new_integer(1));
        assert!(result.is_err());
    }

    #[test]
    fn add_dispatches_by_type() {
        assert_eq!(Object::new_integer(1).add(&Object::new_integer(2)).unwrap().as_integer(), Some(3));
        assert_eq!(
            Object::new_string("foo").add(&Object::new_string("bar")).unwrap().str_repr(),
            "foobar"
        );
    }

    #[test]
    fn unset_index_shrinks_list() {
        let mut list = Object::from_json("[1,2,3]").unwrap();
        let removed = list.unset_index(1).unwrap();
        assert_eq!(removed.as_integer(), Some(2));
        assert_eq!(list.format_json().unwrap(), "[1,3]");
    }

    #[test]
    fn freeze_unfreeze_round_trip() {
        let obj = Object::new_dict();
        obj.freeze();
        obj.freeze();
        assert!(obj.is_frozen());
        obj.unfreeze_and_free();
        assert!(obj.is_frozen());
        obj.unfreeze_and_free();
        assert!(!obj.is_frozen());
    }
}
