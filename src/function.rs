//! Function calling convention (spec §6.3), grounded on `expr-function.h`
//! and `func-path-lookup.c`/`func-failure-info.c` for the registration and
//! argument-extraction pattern.
//!
//! Three function shapes exist, matching §6.3:
//! - **Simple**: a bare `fn(&mut EvalContext, &[Object]) -> RunResult<Object>`
//!   whose arguments are already evaluated. The original's signature is
//!   `(caller_expr, args[], arg_count)`; `&mut EvalContext` replaces the
//!   original's implicit thread-local `filterx_eval_get_context()` (spec's
//!   scope/error-stack live on an explicit `EvalContext` in this crate, so
//!   there is no global to reach for — see `failure_info`/`failure_info_*`
//!   below, which need the context to read/mutate failure-info state).
//! - **Function node**: a constructor taking `FunctionArgs`, returning a
//!   boxed `Expr` that evaluates its own sub-expressions (`regexp_search`,
//!   `regexp_subst`, `path_lookup`, `cache_json_file`, `failure_info*`).
//! - **Generator-function node**: same shape, but the returned node must
//!   also implement `GeneratorExpr`.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use smallvec::SmallVec;

use crate::context::EvalContext;
use crate::error::{FilterxError, RunResult};
use crate::expr::{Expr, InitContext};
use crate::object::Object;

/// `(caller_expr, args[], arg_count)` (spec §6.3's "Simple" function).
pub type SimpleFunction = fn(&mut EvalContext, &[Object]) -> RunResult<Object>;
/// Builds a function-node `Expr` from parsed call arguments.
pub type FunctionCtor = fn(FunctionArgs) -> RunResult<Box<dyn Expr>>;
/// Like `FunctionCtor`, but the returned node must implement `GeneratorExpr`.
pub type GeneratorFunctionCtor = fn(FunctionArgs) -> RunResult<Box<dyn Expr>>;

/// `filterx_simple_function_argument_error` (spec §6.3): the error a simple
/// function raises when one of its already-evaluated arguments is wrong.
#[must_use]
pub fn simple_function_argument_error(function_name: &'static str, message: impl Into<String>) -> FilterxError {
    FilterxError::argument("invalid argument").with_expr_type(function_name).with_detail(message.into())
}

// --- Process-wide registries (spec §6.3's "immutable after filterx_global_init") ---

fn simple_functions() -> &'static Mutex<HashMap<&'static str, SimpleFunction>> {
    static REG: OnceLock<Mutex<HashMap<&'static str, SimpleFunction>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

fn function_ctors() -> &'static Mutex<HashMap<&'static str, FunctionCtor>> {
    static REG: OnceLock<Mutex<HashMap<&'static str, FunctionCtor>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

fn generator_function_ctors() -> &'static Mutex<HashMap<&'static str, GeneratorFunctionCtor>> {
    static REG: OnceLock<Mutex<HashMap<&'static str, GeneratorFunctionCtor>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

/// # Errors
/// Returns an error if `name` is already registered.
pub fn register_simple_function(name: &'static str, func: SimpleFunction) -> RunResult<()> {
    let mut reg = simple_functions().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if reg.contains_key(name) {
        return Err(FilterxError::internal("function already registered").with_detail(name));
    }
    reg.insert(name, func);
    Ok(())
}

/// # Errors
/// Returns an error if `name` is already registered.
pub fn register_function_ctor(name: &'static str, ctor: FunctionCtor) -> RunResult<()> {
    let mut reg = function_ctors().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if reg.contains_key(name) {
        return Err(FilterxError::internal("function already registered").with_detail(name));
    }
    reg.insert(name, ctor);
    Ok(())
}

/// # Errors
/// Returns an error if `name` is already registered.
pub fn register_generator_function_ctor(name: &'static str, ctor: GeneratorFunctionCtor) -> RunResult<()> {
    let mut reg = generator_function_ctors().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if reg.contains_key(name) {
        return Err(FilterxError::internal("generator function already registered").with_detail(name));
    }
    reg.insert(name, ctor);
    Ok(())
}

#[must_use]
pub fn lookup_simple_function(name: &str) -> Option<SimpleFunction> {
    simple_functions().lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(name).copied()
}

#[must_use]
pub fn lookup_function_ctor(name: &str) -> Option<FunctionCtor> {
    function_ctors().lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(name).copied()
}

#[must_use]
pub fn lookup_generator_function_ctor(name: &str) -> Option<GeneratorFunctionCtor> {
    generator_function_ctors().lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(name).copied()
}

// --- FunctionArgs: positional + named argument extraction (spec §6.3) ------

/// Parsed call arguments, handed to a `FunctionCtor`/`GeneratorFunctionCtor`.
/// Positional arguments are taken by index (each can only be taken once, like
/// the original's `filterx_function_args_get_expr` which removes the entry
/// from its `GPtrArray`); named arguments are taken by name and must all be
/// consumed by the time `check` runs (spec: "asserts no unknown args remain").
///
/// Call sites rarely pass more than a handful of arguments, so `positional`
/// is inlined the way the original's call-arg vectors are sized in the
/// bytecode VM (`kwname_ids`/tuple-item storage): most calls never spill to
/// the heap.
pub struct FunctionArgs {
    positional: SmallVec<[Option<Box<dyn Expr>>; 4]>,
    named: HashMap<String, Box<dyn Expr>>,
}

impl FunctionArgs {
    #[must_use]
    pub fn new(positional: Vec<Box<dyn Expr>>, named: HashMap<String, Box<dyn Expr>>) -> Self {
        Self { positional: positional.into_iter().map(Some).collect(), named }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// `function_args_get_expr(n)`.
    ///
    /// # Errors
    /// Returns an error if `n` is out of range or was already taken.
    pub fn get_expr(&mut self, n: usize) -> RunResult<Box<dyn Expr>> {
        self.positional
            .get_mut(n)
            .and_then(Option::take)
            .ok_or_else(|| FilterxError::argument("missing positional argument").with_detail(n.to_string()))
    }

    /// `function_args_get_literal_string(n, &len)`: takes the expression at
    /// `n` and requires it to be a literal string.
    ///
    /// # Errors
    /// Returns an error if `n` is out of range, already taken, not literal,
    /// or not a string.
    pub fn get_literal_string(&mut self, n: usize) -> RunResult<String> {
        let expr = self.get_expr(n)?;
        literal_string(expr.as_ref())
    }

    /// `function_args_get_named_expr(name)`.
    #[must_use]
    pub fn get_named_expr(&mut self, name: &str) -> Option<Box<dyn Expr>> {
        self.named.remove(name)
    }

    /// `function_args_get_named_literal_string(name, &len, &exists)`.
    ///
    /// # Errors
    /// Returns an error if the named argument is present but not a literal
    /// string.
    pub fn get_named_literal_string(&mut self, name: &str) -> RunResult<Option<String>> {
        match self.named.remove(name) {
            Some(expr) => literal_string(expr.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    /// `function_args_get_named_literal_boolean(name, &exists, &error)`.
    ///
    /// # Errors
    /// Returns an error if the named argument is present but not a literal
    /// boolean.
    pub fn get_named_literal_boolean(&mut self, name: &str) -> RunResult<Option<bool>> {
        match self.named.remove(name) {
            Some(expr) => {
                let value = expr.literal_value().ok_or_else(|| {
                    FilterxError::argument("named argument must be a literal boolean").with_detail(name.to_owned())
                })?;
                match value.truthy_if_boolean() {
                    Some(b) => Ok(Some(b)),
                    None => Err(FilterxError::argument("named argument must be a literal boolean").with_detail(name.to_owned())),
                }
            }
            None => Ok(None),
        }
    }

    /// `function_args_get_named_literal_object(name, &exists)`.
    ///
    /// # Errors
    /// Returns an error if the named argument is present but not literal.
    pub fn get_named_literal_object(&mut self, name: &str) -> RunResult<Option<Object>> {
        match self.named.remove(name) {
            Some(expr) => expr
                .literal_value()
                .cloned()
                .ok_or_else(|| FilterxError::argument("named argument must be literal").with_detail(name.to_owned()))
                .map(Some),
            None => Ok(None),
        }
    }

    /// `function_args_check(args, err)`: must be called after all
    /// extractions; fails if any named argument was never consumed.
    ///
    /// # Errors
    /// Returns an error naming the first unconsumed named argument.
    pub fn check(&self) -> RunResult<()> {
        if let Some(name) = self.named.keys().next() {
            return Err(FilterxError::argument("unknown named argument").with_detail(name.clone()));
        }
        Ok(())
    }

    /// Consumes the remaining positional expressions in order, erroring if
    /// any named arguments are left over. Used by simple-function call sites,
    /// which have no named-argument concept (spec §6.3's "Simple" shape).
    ///
    /// # Errors
    /// Returns an error if any named argument remains.
    pub fn into_positional(mut self) -> RunResult<Vec<Box<dyn Expr>>> {
        self.check()?;
        Ok(self.positional.drain(..).map(|e| e.expect("positional args are only taken via get_expr")).collect())
    }
}

fn literal_string(expr: &dyn Expr) -> RunResult<String> {
    let value = expr.literal_value().ok_or_else(|| FilterxError::argument("argument must be a string literal"))?;
    value.as_string().map(|s| s.to_string()).ok_or_else(|| FilterxError::argument("argument must be a string literal"))
}

impl Object {
    /// Narrow helper used by `get_named_literal_boolean`: `Some(b)` only for
    /// the `boolean` type, unlike `truthy()` which coerces every type.
    fn truthy_if_boolean(&self) -> Option<bool> {
        if self.is_type("boolean") { Some(self.truthy()) } else { None }
    }
}

// --- Simple-function call node ---------------------------------------------

/// Wraps a registered `SimpleFunction`: evaluates every argument expression
/// eagerly, then calls the function with the resulting `Object`s (spec
/// §6.3's "args are already-evaluated Objects").
pub struct SimpleFunctionCall {
    name: &'static str,
    args: Vec<Box<dyn Expr>>,
    func: SimpleFunction,
}

impl std::fmt::Debug for SimpleFunctionCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimpleFunctionCall({})", self.name)
    }
}

impl Expr for SimpleFunctionCall {
    fn type_name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        for (i, arg) in self.args.iter_mut().enumerate() {
            if let Err(e) = arg.init(cfg) {
                for already in &mut self.args[..i] {
                    already.deinit();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let mut evaluated = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            evaluated.push(arg.eval(ctx)?);
        }
        (self.func)(ctx, &evaluated)
    }

    fn deinit(&mut self) {
        for arg in &mut self.args {
            arg.deinit();
        }
    }
}

/// Builds the call node for a function, trying a function-node ctor first,
/// then a plain simple function (spec §6.3, `filterx_function_lookup`).
///
/// # Errors
/// Returns an error if `name` isn't registered, or argument extraction for
/// the matched shape fails.
pub fn build_function_call(name: &'static str, args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if let Some(ctor) = lookup_function_ctor(name) {
        return ctor(args);
    }
    if let Some(func) = lookup_simple_function(name) {
        let args = args.into_positional()?;
        return Ok(Box::new(SimpleFunctionCall { name, args, func }));
    }
    Err(FilterxError::argument("unknown function").with_detail(name.to_owned()))
}

/// `filterx_generator_function_lookup` (spec §6.3).
///
/// # Errors
/// Returns an error if `name` isn't a registered generator function, or the
/// registered ctor's returned node doesn't implement `GeneratorExpr`.
pub fn build_generator_function_call(name: &str, args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    let ctor = lookup_generator_function_ctor(name)
        .ok_or_else(|| FilterxError::argument("unknown generator function").with_detail(name.to_owned()))?;
    let node = ctor(args)?;
    if node.as_generator().is_none() {
        return Err(FilterxError::internal("registered generator function ctor produced a non-generator node").with_detail(name.to_owned()));
    }
    Ok(node)
}

// --- path_lookup(object, [key, ...]) (spec §9 supplement B, `func-path-lookup.c`) ---

/// `path_lookup(object, path)`: folds `object.get_subscript`/`getattr`
/// through a literal list of string/integer keys (spec §4.1's
/// `object_path_lookup`, `func-path-lookup.c`).
#[derive(Debug)]
pub struct PathLookup {
    object_expr: Box<dyn Expr>,
    keys: Vec<Object>,
}

impl Expr for PathLookup {
    fn type_name(&self) -> &'static str {
        "path_lookup"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.object_expr.init(cfg)
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let object = self.object_expr.eval(ctx)?;
        object.path_lookup(&self.keys)
    }

    fn deinit(&mut self) {
        self.object_expr.deinit();
    }
}

/// `filterx_function_path_lookup_new` (spec §9 supplement B).
///
/// # Errors
/// Returns an error if the call doesn't take exactly two arguments, or the
/// second argument isn't a literal list.
pub fn path_lookup_ctor(mut args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 2 {
        return Err(FilterxError::argument("path_lookup() takes exactly 2 arguments"));
    }
    let object_expr = args.get_expr(0)?;
    let path_expr = args.get_expr(1)?;
    let path_value = path_expr
        .literal_value()
        .ok_or_else(|| FilterxError::init("path_lookup()'s second argument must be a literal list"))?;
    let keys = path_value
        .list_items()
        .map_err(|_| FilterxError::init("path_lookup()'s second argument must be a literal list"))?;
    args.check()?;
    Ok(Box::new(PathLookup { object_expr, keys }))
}

// --- failure_info() / failure_info_clear() / failure_info_enable() / failure_info_meta() ---
// (spec §4.10/§6.3, `func-failure-info.c`)

/// `failure_info()`: snapshots the context's captured failure-info entries
/// into a list of dicts (`location`, `source_text`, `error`, optional `meta`).
#[derive(Debug)]
pub struct FailureInfo;

impl Expr for FailureInfo {
    fn type_name(&self) -> &'static str {
        "failure_info"
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let mut list = Object::new_list();
        for entry in ctx.failure_info() {
            let mut dict = Object::new_dict();
            dict.setattr("location", Object::new_string(entry.location.clone()))?;
            dict.setattr("source_text", Object::new_string(entry.source_text.clone()))?;
            dict.setattr("error", Object::new_string(entry.error.clone()))?;
            if let Some(meta) = &entry.meta {
                dict.setattr("meta", meta.clone())?;
            }
            list.append(dict)?;
        }
        Ok(list)
    }
}

/// # Errors
/// Returns an error if called with any arguments.
pub fn failure_info_ctor(args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 0 {
        return Err(FilterxError::argument("failure_info() takes no arguments"));
    }
    args.check()?;
    Ok(Box::new(FailureInfo))
}

#[derive(Debug)]
pub struct FailureInfoClear;

impl Expr for FailureInfoClear {
    fn type_name(&self) -> &'static str {
        "failure_info_clear"
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        ctx.clear_failure_info();
        Ok(Object::new_bool(true))
    }
}

/// # Errors
/// Returns an error if called with any arguments.
pub fn failure_info_clear_ctor(args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 0 {
        return Err(FilterxError::argument("failure_info_clear() takes no arguments"));
    }
    args.check()?;
    Ok(Box::new(FailureInfoClear))
}

#[derive(Debug)]
pub struct FailureInfoEnable {
    collect_falsy: bool,
}

impl Expr for FailureInfoEnable {
    fn type_name(&self) -> &'static str {
        "failure_info_enable"
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        ctx.enable_failure_info(self.collect_falsy);
        Ok(Object::new_bool(true))
    }
}

/// # Errors
/// Returns an error if called with positional arguments, or `collect_falsy`
/// isn't a literal boolean.
pub fn failure_info_enable_ctor(mut args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 0 {
        return Err(FilterxError::argument("failure_info_enable() takes no positional arguments"));
    }
    let collect_falsy = args.get_named_literal_boolean("collect_falsy")?.unwrap_or(false);
    args.check()?;
    Ok(Box::new(FailureInfoEnable { collect_falsy }))
}

#[derive(Debug)]
pub struct FailureInfoMeta {
    metadata: Object,
}

impl Expr for FailureInfoMeta {
    fn type_name(&self) -> &'static str {
        "failure_info_meta"
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        if ctx.failure_info_enabled() {
            ctx.set_current_frame_meta(self.metadata.clone());
        }
        Ok(Object::new_bool(true))
    }
}

/// # Errors
/// Returns an error if not called with exactly one literal argument.
pub fn failure_info_meta_ctor(mut args: FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 1 {
        return Err(FilterxError::argument("failure_info_meta() takes exactly 1 argument"));
    }
    let expr = args.get_expr(0)?;
    let metadata = expr.literal_value().cloned().ok_or_else(|| FilterxError::init("failure_info_meta()'s argument must be literal"))?;
    args.check()?;
    Ok(Box::new(FailureInfoMeta { metadata }))
}

/// Registers every built-in function-node ctor this crate ships. Called once
/// from `filterx_global_init` (spec §6.3).
///
/// # Errors
/// Returns an error if a name was already registered (should not happen on
/// a single `filterx_global_init` call).
pub(crate) fn register_builtins() -> RunResult<()> {
    register_function_ctor("regexp_search", crate::expr::regexp::regexp_search_ctor)?;
    register_function_ctor("regexp_subst", crate::expr::regexp::regexp_subst_ctor)?;
    register_function_ctor("path_lookup", path_lookup_ctor)?;
    register_function_ctor("failure_info", failure_info_ctor)?;
    register_function_ctor("failure_info_clear", failure_info_clear_ctor)?;
    register_function_ctor("failure_info_enable", failure_info_enable_ctor)?;
    register_function_ctor("failure_info_meta", failure_info_meta_ctor)?;
    register_function_ctor("cache_json_file", crate::cache_json::cache_json_file_ctor)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;
    use crate::expr::literal::Literal;
    use pretty_assertions::assert_eq;

    #[test]
    fn path_lookup_folds_through_literal_keys() {
        let object_expr: Box<dyn Expr> = Box::new(Literal::new(Object::from_json(r#"{"a":{"b":1}}"#).unwrap()));
        let path_expr: Box<dyn Expr> = Box::new(Literal::new(Object::from_json(r#"["a","b"]"#).unwrap()));
        let args = FunctionArgs::new(vec![object_expr, path_expr], HashMap::new());
        let node = path_lookup_ctor(args).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn failure_info_round_trips_through_enable_and_list() {
        // Default `collect_falsy=false` only records truthy outcomes.
        let mut ctx = EvalContext::new(Scope::empty());
        let enable = failure_info_enable_ctor(FunctionArgs::new(vec![], HashMap::new())).unwrap();
        enable.eval(&mut ctx).unwrap();
        ctx.maybe_record_failure("loc".into(), "src".into(), "boom".into(), Some(true));
        let info = failure_info_ctor(FunctionArgs::new(vec![], HashMap::new())).unwrap();
        let result = info.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"[{"location":"loc","source_text":"src","error":"boom"}]"#);
    }

    #[test]
    fn failure_info_enable_collect_falsy_records_falsy_outcomes_too() {
        let mut named = HashMap::new();
        named.insert("collect_falsy".to_owned(), Box::new(Literal::new(Object::new_bool(true))) as Box<dyn Expr>);
        let mut ctx = EvalContext::new(Scope::empty());
        let enable = failure_info_enable_ctor(FunctionArgs::new(vec![], named)).unwrap();
        enable.eval(&mut ctx).unwrap();
        ctx.maybe_record_failure("loc".into(), "src".into(), "boom".into(), Some(false));
        let info = failure_info_ctor(FunctionArgs::new(vec![], HashMap::new())).unwrap();
        let result = info.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"[{"location":"loc","source_text":"src","error":"boom"}]"#);
    }

    #[test]
    fn check_rejects_unknown_named_argument() {
        let mut named = HashMap::new();
        named.insert("bogus".to_owned(), Box::new(Literal::new(Object::new_bool(true))) as Box<dyn Expr>);
        let args = FunctionArgs::new(vec![], named);
        assert!(args.check().is_err());
    }
}
