//! Generator-to-value adapter node (spec §4.7, §4.9).
//!
//! A bare generator (`PlusGenerator`, a future literal-container generator,
//! ...) can't be evaluated on its own — `GeneratorExpr::generate` only knows
//! how to fill an already-created container. `CreateContainerNew` is the
//! top-level wrapper that supplies that container: it asks the inner
//! generator for an empty one, fills it, and hands back the result as an
//! ordinary `Object` (grounded on `expr-generator.c`'s `filterx_generator_eval`,
//! which does exactly this when no outer fillable has been set).

use crate::context::EvalContext;
use crate::error::RunResult;
use crate::expr::{Expr, GeneratorExpr, InitContext};
use crate::object::Object;

#[derive(Debug)]
pub struct CreateContainerNew {
    generator: Box<dyn Expr>,
}

impl CreateContainerNew {
    /// # Panics
    /// Panics if `generator` doesn't implement `GeneratorExpr`; callers are
    /// expected to only wrap nodes built by a generator-function-node
    /// constructor (spec §6.3).
    #[must_use]
    pub fn new(generator: Box<dyn Expr>) -> Self {
        assert!(generator.as_generator().is_some(), "CreateContainerNew requires a generator node");
        Self { generator }
    }
}

impl Expr for CreateContainerNew {
    fn type_name(&self) -> &'static str {
        "create_container_new"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.generator.init(cfg)
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let generator = self.generator.as_generator().expect("checked in new()");
        let parent_hint = Object::new_dict();
        let mut fillable = generator.create_container(&parent_hint)?;
        generator.generate(&mut fillable, ctx)?;
        Ok(fillable)
    }

    fn deinit(&mut self) {
        self.generator.deinit();
    }

    fn ignore_falsy_result(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::plus::PlusGenerator;
    use crate::expr::literal::Literal;

    #[test]
    fn wraps_a_plus_generator_into_a_merged_dict() {
        let lhs = Box::new(Literal::new(Object::from_json(r#"{"a":1}"#).unwrap()));
        let rhs = Box::new(Literal::new(Object::from_json(r#"{"b":2}"#).unwrap()));
        let generator = Box::new(PlusGenerator::new(lhs, rhs));
        let node = CreateContainerNew::new(generator);
        let mut ctx = EvalContext::new(crate::context::Scope::empty());
        let result = node.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"{"a":1,"b":2}"#);
    }
}
