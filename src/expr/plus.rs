//! Binary `+` (spec §4.8) and its generator counterpart (spec §4.7),
//! grounded on `expr-plus.c` and `expr-plus-generator.c`.

use crate::context::EvalContext;
use crate::error::{FilterxError, RunResult};
use crate::expr::literal::Literal;
use crate::expr::{Expr, GeneratorExpr, InitContext};
use crate::object::Object;

/// Plain binary `+`: string concat, numeric add, or whole-value dict/list
/// merge via `Object::add` (spec §4.8). Folds to a `Literal` when both
/// operands are literal (`expr-plus.c`'s `filterx_plus_optimize`).
#[derive(Debug)]
pub struct Plus {
    lhs: Box<dyn Expr>,
    rhs: Box<dyn Expr>,
}

impl Plus {
    #[must_use]
    pub fn new(lhs: Box<dyn Expr>, rhs: Box<dyn Expr>) -> Self {
        Self { lhs, rhs }
    }
}

impl Expr for Plus {
    fn type_name(&self) -> &'static str {
        "plus"
    }

    fn optimize(self: Box<Self>) -> RunResult<Box<dyn Expr>> {
        let lhs = self.lhs.optimize()?;
        let rhs = self.rhs.optimize()?;
        if let (Some(a), Some(b)) = (lhs.literal_value(), rhs.literal_value()) {
            let folded = a.add(b)?;
            return Ok(Box::new(Literal::new(folded)));
        }
        Ok(Box::new(Self { lhs, rhs }))
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.lhs.init(cfg)?;
        if let Err(e) = self.rhs.init(cfg) {
            self.lhs.deinit();
            return Err(e);
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let lhs = self.lhs.eval(ctx)?;
        let rhs = self.rhs.eval(ctx)?;
        lhs.add(&rhs)
    }

    fn deinit(&mut self) {
        self.lhs.deinit();
        self.rhs.deinit();
    }
}

/// The generator form of `+`, picked by the parser when either operand is
/// itself a container-producing generator (e.g. a nested `+` chain, or a
/// literal-container generator) so the whole chain fills one container
/// instead of allocating one per level (spec §4.7's "flatten by key/element",
/// `expr-plus-generator.c`'s `_generate`).
#[derive(Debug)]
pub struct PlusGenerator {
    lhs: Box<dyn Expr>,
    rhs: Box<dyn Expr>,
}

impl PlusGenerator {
    #[must_use]
    pub fn new(lhs: Box<dyn Expr>, rhs: Box<dyn Expr>) -> Self {
        Self { lhs, rhs }
    }

    fn fill_operand(operand: &dyn Expr, fillable: &mut Object, ctx: &mut EvalContext) -> RunResult<()> {
        if let Some(generator) = operand.as_generator() {
            return generator.generate(fillable, ctx);
        }
        let value = operand.eval(ctx)?;
        merge_into_fillable(fillable, &value)
    }
}

/// Flattens `source`'s own entries into `fillable` (spec §4.7): a dict
/// source inserts its key/value pairs, a list source appends its elements.
/// Unlike `Object::add`, this never wraps `source` itself as a single
/// nested child.
///
/// # Errors
/// Returns an error if `source`'s container kind doesn't match `fillable`'s.
fn merge_into_fillable(fillable: &mut Object, source: &Object) -> RunResult<()> {
    if source.is_type("dict_object") {
        if !fillable.is_type("dict_object") {
            return Err(FilterxError::eval("invalid fillable type").with_detail("dict operand merged into a non-dict fillable"));
        }
        for (key, value) in source.dict_items()? {
            fillable.setattr(&key, value)?;
        }
        Ok(())
    } else if source.is_type("list_object") {
        if !fillable.is_type("list_object") {
            return Err(FilterxError::eval("invalid fillable type").with_detail("list operand merged into a non-list fillable"));
        }
        for item in source.list_items()? {
            fillable.append(item)?;
        }
        Ok(())
    } else {
        Err(FilterxError::eval("invalid fillable type").with_detail("generator operand did not produce a dict or list"))
    }
}

impl Expr for PlusGenerator {
    fn type_name(&self) -> &'static str {
        "plus_generator"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.lhs.init(cfg)?;
        if let Err(e) = self.rhs.init(cfg) {
            self.lhs.deinit();
            return Err(e);
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let parent_hint = Object::new_dict();
        let mut fillable = self.create_container(&parent_hint)?;
        self.generate(&mut fillable, ctx)?;
        Ok(fillable)
    }

    fn deinit(&mut self) {
        self.lhs.deinit();
        self.rhs.deinit();
    }

    fn as_generator(&self) -> Option<&dyn GeneratorExpr> {
        Some(self)
    }

    fn ignore_falsy_result(&self) -> bool {
        true
    }
}

impl GeneratorExpr for PlusGenerator {
    fn create_container(&self, parent_hint: &Object) -> RunResult<Object> {
        if let Some(generator) = self.lhs.as_generator() {
            return generator.create_container(parent_hint);
        }
        if let Some(literal) = self.lhs.literal_value() {
            if literal.is_type("list_object") {
                return Ok(Object::new_list());
            }
        }
        Ok(Object::new_dict())
    }

    fn generate(&self, fillable: &mut Object, ctx: &mut EvalContext) -> RunResult<()> {
        Self::fill_operand(self.lhs.as_ref(), fillable, ctx)?;
        Self::fill_operand(self.rhs.as_ref(), fillable, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;

    #[test]
    fn constant_folds_when_both_operands_are_literal() {
        let plus = Box::new(Plus::new(
            Box::new(Literal::new(Object::new_string("foo"))),
            Box::new(Literal::new(Object::new_string("bar"))),
        ));
        let folded = plus.optimize().unwrap();
        assert!(folded.is_literal());
        assert_eq!(folded.literal_value().unwrap().str_repr(), "foobar");
    }

    #[test]
    fn generator_flattens_nested_dict_chain_into_one_container() {
        let a = Box::new(Literal::new(Object::from_json(r#"{"a":1}"#).unwrap()));
        let b = Box::new(Literal::new(Object::from_json(r#"{"b":2}"#).unwrap()));
        let c = Box::new(Literal::new(Object::from_json(r#"{"c":3}"#).unwrap()));
        let inner = Box::new(PlusGenerator::new(a, b));
        let outer = PlusGenerator::new(inner, c);
        let mut ctx = EvalContext::new(Scope::empty());
        let result = outer.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"{"a":1,"b":2,"c":3}"#);
    }

    #[test]
    fn generator_flattens_list_elements_not_nested_lists() {
        let a = Box::new(Literal::new(Object::from_json(r"[1,2]").unwrap()));
        let b = Box::new(Literal::new(Object::from_json(r"[3,4]").unwrap()));
        let generator = PlusGenerator::new(a, b);
        let mut ctx = EvalContext::new(Scope::empty());
        let result = generator.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r"[1,2,3,4]");
    }
}
