//! Literal dict/list container nodes (spec §4.6), grounded on
//! `expr-literal-container.c`.
//!
//! Unlike a plain `Literal`, these build their value fresh on every `eval`
//! call from (possibly non-constant) element sub-expressions — except when
//! every element turns out to be literal itself, in which case `optimize`
//! folds the whole thing down to a single `Literal` up front.

use crate::context::EvalContext;
use crate::error::RunResult;
use crate::expr::literal::Literal;
use crate::expr::{Expr, InitContext};
use crate::object::Object;

/// One `key: value` pair of a literal dict node. The key sub-expression
/// must evaluate to a string (spec §4.6); it is not restricted to a
/// `Literal` so computed keys are allowed.
#[derive(Debug)]
pub struct DictElement {
    pub key: Box<dyn Expr>,
    pub value: Box<dyn Expr>,
}

#[derive(Debug)]
pub struct LiteralDict {
    elements: Vec<DictElement>,
}

impl LiteralDict {
    #[must_use]
    pub fn new(elements: Vec<DictElement>) -> Self {
        Self { elements }
    }

    fn all_literal(&self) -> bool {
        self.elements.iter().all(|e| e.key.is_literal() && e.value.is_literal())
    }
}

impl Expr for LiteralDict {
    fn type_name(&self) -> &'static str {
        "literal_container_dict"
    }

    fn optimize(mut self: Box<Self>) -> RunResult<Box<dyn Expr>> {
        let mut folded = Vec::with_capacity(self.elements.len());
        for element in std::mem::take(&mut self.elements) {
            folded.push(DictElement { key: element.key.optimize()?, value: element.value.optimize()? });
        }
        self.elements = folded;
        if self.all_literal() {
            let mut ctx = EvalContext::new(crate::context::Scope::empty());
            let value = self.eval(&mut ctx)?;
            return Ok(Box::new(Literal::new(value)));
        }
        Ok(self)
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        for (i, element) in self.elements.iter_mut().enumerate() {
            if let Err(e) = element.key.init(cfg) {
                for already in &mut self.elements[..i] {
                    already.key.deinit();
                    already.value.deinit();
                }
                return Err(e);
            }
            if let Err(e) = element.value.init(cfg) {
                element.key.deinit();
                for already in &mut self.elements[..i] {
                    already.key.deinit();
                    already.value.deinit();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let mut dict = Object::new_dict();
        for element in &self.elements {
            let key = element.key.eval(ctx)?;
            let key_name = key.as_string().ok_or_else(|| {
                crate::error::FilterxError::eval("non-string dict key").with_expr_type(self.type_name())
            })?;
            let value = element.value.eval(ctx)?;
            dict.set_subscript(&Object::new_string(key_name.as_ref()), value)?;
        }
        Ok(dict)
    }

    fn deinit(&mut self) {
        for element in &mut self.elements {
            element.key.deinit();
            element.value.deinit();
        }
    }
}

#[derive(Debug)]
pub struct LiteralList {
    elements: Vec<Box<dyn Expr>>,
}

impl LiteralList {
    #[must_use]
    pub fn new(elements: Vec<Box<dyn Expr>>) -> Self {
        Self { elements }
    }
}

impl Expr for LiteralList {
    fn type_name(&self) -> &'static str {
        "literal_container_list"
    }

    fn optimize(mut self: Box<Self>) -> RunResult<Box<dyn Expr>> {
        let mut folded = Vec::with_capacity(self.elements.len());
        for element in std::mem::take(&mut self.elements) {
            folded.push(element.optimize()?);
        }
        self.elements = folded;
        if self.elements.iter().all(|e| e.is_literal()) {
            let mut ctx = EvalContext::new(crate::context::Scope::empty());
            let value = self.eval(&mut ctx)?;
            return Ok(Box::new(Literal::new(value)));
        }
        Ok(self)
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        for (i, element) in self.elements.iter_mut().enumerate() {
            if let Err(e) = element.init(cfg) {
                for already in &mut self.elements[..i] {
                    already.deinit();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let mut list = Object::new_list();
        for element in &self.elements {
            let value = element.eval(ctx)?;
            list.append(value)?;
        }
        Ok(list)
    }

    fn deinit(&mut self) {
        for element in &mut self.elements {
            element.deinit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_literal_dict_folds_to_a_literal() {
        let dict = Box::new(LiteralDict::new(vec![DictElement {
            key: Box::new(Literal::new(Object::new_string("a"))),
            value: Box::new(Literal::new(Object::new_integer(1))),
        }]));
        let folded = dict.optimize().unwrap();
        assert!(folded.is_literal());
        assert_eq!(folded.literal_value().unwrap().format_json().unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn list_preserves_element_order() {
        let list = LiteralList::new(vec![
            Box::new(Literal::new(Object::new_integer(1))),
            Box::new(Literal::new(Object::new_integer(2))),
            Box::new(Literal::new(Object::new_integer(3))),
        ]);
        let mut ctx = EvalContext::new(crate::context::Scope::empty());
        let result = list.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), "[1,2,3]");
    }
}
