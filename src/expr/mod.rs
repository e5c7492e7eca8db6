//! Expression-node protocol (spec §3.6, §4.9).
//!
//! Every filterx expression is a `Box<dyn Expr>`. The lifecycle mirrors the
//! C original's four calls exactly (`optimize` → `init` → `eval`/`deinit`),
//! except `free` is just `Drop` here since there's no manual refcounting to
//! do (spec §4.9's "destruction").

pub mod container;
pub mod generator;
pub mod literal;
pub mod plus;
pub mod regexp;

use crate::context::EvalContext;
use crate::error::RunResult;
use crate::object::Object;

/// Thin marker passed to `Expr::init` (spec §4.9, SPEC_FULL.md A.3). Carries
/// nothing today; exists so `init` has a place to receive host configuration
/// (e.g. a future cache-reload policy) without changing every node's
/// signature later.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitContext;

/// The expression-node protocol (spec §3.6).
pub trait Expr: std::fmt::Debug {
    /// Informational type name, used in error messages and reflection
    /// (spec §3.6).
    fn type_name(&self) -> &'static str;

    /// Constant-folds this node and its children where possible, returning
    /// a (possibly different) node to use in its place. Default: no folding.
    ///
    /// # Errors
    /// Returns an error if folding a literal sub-expression itself fails.
    fn optimize(self: Box<Self>) -> RunResult<Box<dyn Expr>> {
        Ok(self)
    }

    /// Validates and prepares this node for evaluation (spec §4.9). Called
    /// exactly once, after `optimize`, before any `eval`.
    ///
    /// # Errors
    /// Returns an initialization error (e.g. a malformed regexp pattern).
    fn init(&mut self, _cfg: &InitContext) -> RunResult<()> {
        Ok(())
    }

    /// Runtime evaluation (spec §4.9). May be called many times after one
    /// `init`.
    ///
    /// # Errors
    /// Returns an eval error; callers decide whether to propagate or treat
    /// the node's result as falsy (spec §4.10's "ignore falsy result").
    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object>;

    /// Releases any resources acquired in `init` so this node could be
    /// `init`ed again. Default: nothing to release.
    fn deinit(&mut self) {}

    /// Whether an eval failure from this node should be swallowed to a
    /// falsy result rather than propagated (spec §4.10). Literals and most
    /// leaf nodes answer `false`; boolean combinators override this.
    fn ignore_falsy_result(&self) -> bool {
        false
    }

    /// `true` for nodes that always evaluate to the same constant value
    /// (spec §3.6's "is_literal").
    fn is_literal(&self) -> bool {
        false
    }

    /// The constant value of a literal node, if `is_literal()` is `true`.
    fn literal_value(&self) -> Option<&Object> {
        None
    }

    /// Downcasts to the generator sub-protocol (spec §4.9's "Generator
    /// nodes"), if this node implements it. Default: not a generator.
    fn as_generator(&self) -> Option<&dyn GeneratorExpr> {
        None
    }
}

/// The generator sub-protocol (spec §4.9, §4.7). A generator node doesn't
/// produce a standalone value; it fills an already-created container
/// (dict/list) that the caller owns exclusively.
pub trait GeneratorExpr: Expr {
    /// Creates an empty container of the kind this generator would fill,
    /// using `parent_hint` only to decide dict-vs-list shape when the
    /// generator itself doesn't know (spec §4.7's "create_container").
    fn create_container(&self, parent_hint: &Object) -> RunResult<Object>;

    /// Fills `fillable` (an exclusively-held, freshly created or
    /// CoW-prepared container) with this generator's elements (spec §4.7).
    ///
    /// # Errors
    /// Returns an eval error if evaluating an element fails or the
    /// container rejects an element (e.g. wrong key type).
    fn generate(&self, fillable: &mut Object, ctx: &mut EvalContext) -> RunResult<()>;
}

/// Folds a child node in place during `optimize`, used by composite nodes
/// that hold boxed children (spec §4.9's constant-folding pass).
pub(crate) fn optimize_child(child: Box<dyn Expr>) -> RunResult<Box<dyn Expr>> {
    child.optimize()
}
