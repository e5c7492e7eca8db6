//! `cache_json_file(path)` (spec §6.4), grounded on `func-cache-json-file.c`.
//!
//! The original publishes a reloaded root via an atomic pointer swap so a
//! file-monitor thread can replace it while eval threads read the old value
//! lock-free. This crate's `Object` graph is `Rc`/`RefCell`-based and not
//! `Send`, so there is no thread to race with; "publish" here is a plain
//! `RefCell` swap, reloaded synchronously when `reload_if_changed` is called
//! (the host decides when that happens — e.g. once per batch) rather than
//! from a background file-watcher thread. This is a deliberate deviation
//! from the original's concurrency model, not an omission of the feature.

use std::cell::RefCell;
use std::fs;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::context::EvalContext;
use crate::dedup::DedupStorage;
use crate::error::{FilterxError, RunResult};
use crate::expr::Expr;
use crate::function::FunctionArgs;
use crate::object::Object;

/// `FilterXFunctionCacheJsonFile` (spec §6.4): loads a JSON file once at
/// construction, republishing a new readonly/deduplicated root whenever
/// `reload_if_changed` observes a newer mtime.
///
/// The original's `_file_monitor_callback` logs reload failures to the
/// syslog internal logger; this crate has no logging crate in its stack
/// (SPEC_FULL.md A.2), so a failed reload's message is kept in
/// `reload_result` instead, polled by the host rather than written anywhere.
#[derive(Debug)]
pub struct CacheJsonFile {
    path: String,
    published: RefCell<Object>,
    last_modified: RefCell<Option<SystemTime>>,
    reload_result: RwLock<Option<String>>,
}

impl CacheJsonFile {
    /// `_load_json_file_version`: read, parse, require object-or-array root,
    /// make readonly, dedup.
    ///
    /// # Errors
    /// Returns an error if the file can't be read, isn't valid JSON, or its
    /// root isn't an object or array (spec §6.4's "root must be dict or
    /// list").
    fn load(path: &str) -> RunResult<Object> {
        let text = fs::read_to_string(path)
            .map_err(|e| FilterxError::argument("failed to read cached JSON file").with_detail(format!("{path}: {e}")))?;
        let object = Object::from_json(&text)
            .map_err(|e| FilterxError::argument("failed to parse cached JSON file").with_detail(format!("{path}: {e}")))?;
        if !object.is_type("dict_object") && !object.is_type("list_object") {
            return Err(FilterxError::argument("cached JSON file root must be an object or array").with_detail(path.to_owned()));
        }
        object.make_readonly();
        let mut dedup = DedupStorage::new();
        Ok(object.dedup(&mut dedup))
    }

    fn mtime(path: &str) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// `filterx_function_cache_json_file_new`: extracts the filepath and
    /// loads the initial version.
    ///
    /// # Errors
    /// Returns an error if the file can't be loaded (see `load`).
    pub fn new(path: String) -> RunResult<Self> {
        let published = Self::load(&path)?;
        let last_modified = Self::mtime(&path);
        Ok(Self {
            path,
            published: RefCell::new(published),
            last_modified: RefCell::new(last_modified),
            reload_result: RwLock::new(None),
        })
    }

    /// Host-driven reload hook (spec §6.4's "reload on change"): re-reads the
    /// file only if its mtime advanced, keeping the previous published
    /// version on any load error (matching the original's
    /// `_file_monitor_callback`, which retains the old value rather than
    /// failing the running evaluation) while recording the failure message
    /// in `last_reload_error` for the host to poll.
    pub fn reload_if_changed(&self) {
        let current = Self::mtime(&self.path);
        if current.is_none() || current == *self.last_modified.borrow() {
            return;
        }
        match Self::load(&self.path) {
            Ok(next) => {
                *self.published.borrow_mut() = next;
                *self.last_modified.borrow_mut() = current;
                *self.reload_result.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
            }
            Err(e) => {
                *self.reload_result.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(e.to_string());
            }
        }
    }

    /// The most recent reload failure, if any, cleared by a subsequent
    /// successful reload.
    #[must_use]
    pub fn last_reload_error(&self) -> Option<String> {
        self.reload_result.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

impl Expr for CacheJsonFile {
    fn type_name(&self) -> &'static str {
        "cache_json_file"
    }

    fn eval(&self, _ctx: &mut EvalContext) -> RunResult<Object> {
        Ok(self.published.borrow().clone())
    }
}

/// # Errors
/// Returns an error if not called with exactly one literal string argument,
/// or the file can't be loaded.
pub fn cache_json_file_ctor(mut args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 1 {
        return Err(FilterxError::argument("cache_json_file() takes exactly 1 argument"));
    }
    let path = args.get_literal_string(0)?;
    args.check()?;
    Ok(Box::new(CacheJsonFile::new(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EvalContext, Scope};
    use std::io::Write;

    fn unique_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("filterx_cache_json_test_{tag}_{}.json", std::process::id()))
    }

    #[test]
    fn loads_and_publishes_object_root() {
        let path = unique_path("load");
        fs::File::create(&path).unwrap().write_all(br#"{"a":1}"#).unwrap();
        let cache = CacheJsonFile::new(path.to_string_lossy().into_owned()).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        let value = cache.eval(&mut ctx).unwrap();
        assert!(value.is_readonly());
        assert_eq!(value.format_json().unwrap(), r#"{"a":1}"#);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_scalar_root() {
        let path = unique_path("scalar");
        fs::File::create(&path).unwrap().write_all(b"42").unwrap();
        let result = CacheJsonFile::new(path.to_string_lossy().into_owned());
        assert!(result.is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn reload_if_changed_picks_up_new_content() {
        let path = unique_path("reload");
        fs::File::create(&path).unwrap().write_all(br#"{"a":1}"#).unwrap();
        let cache = CacheJsonFile::new(path.to_string_lossy().into_owned()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::File::create(&path).unwrap().write_all(br#"{"a":2}"#).unwrap();
        cache.reload_if_changed();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(cache.eval(&mut ctx).unwrap().format_json().unwrap(), r#"{"a":2}"#);
        assert!(cache.last_reload_error().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn reload_retains_old_value_and_records_error_on_bad_content() {
        let path = unique_path("reload_bad");
        fs::File::create(&path).unwrap().write_all(br#"{"a":1}"#).unwrap();
        let cache = CacheJsonFile::new(path.to_string_lossy().into_owned()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::File::create(&path).unwrap().write_all(b"not json").unwrap();
        cache.reload_if_changed();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(cache.eval(&mut ctx).unwrap().format_json().unwrap(), r#"{"a":1}"#);
        assert!(cache.last_reload_error().is_some());
        fs::remove_file(&path).ok();
    }
}
