//! Black-box end-to-end scenarios and boundary behaviors against the public
//! API, mirroring the teacher's plain `tests/` integration-test convention
//! (no fixture-corpus harness, since this crate has no such corpus).

use filterx_core::{
    CreateContainerNew, DictElement, EvalContext, Expr, FilterxErrorKind, InitContext, Literal, LiteralDict,
    LiteralList, Object, Plus, PlusGenerator, RegexpSearch, RegexpSubst, Scope, cow_fork,
};
use pretty_assertions::assert_eq;

fn ctx() -> EvalContext {
    EvalContext::new(Scope::empty())
}

#[test]
fn literal_dict_constant_folds() {
    let dict = Box::new(LiteralDict::new(vec![
        DictElement { key: Box::new(Literal::new(Object::new_string("a"))), value: Box::new(Literal::new(Object::new_integer(1))) },
        DictElement { key: Box::new(Literal::new(Object::new_string("b"))), value: Box::new(Literal::new(Object::new_integer(2))) },
    ]));
    let folded = dict.optimize().unwrap();
    assert!(folded.is_literal());
    assert_eq!(folded.literal_value().unwrap().format_json().unwrap(), r#"{"a":1,"b":2}"#);
}

#[test]
fn cow_fork_on_sibling_write_leaves_root_unchanged() {
    let root = Object::from_json(r#"{"c":{"cc":{"ccc":"ccc"}}}"#).unwrap();
    let c = root.getattr("c").unwrap();
    let c_prime = cow_fork(&c).unwrap();
    let mut cc = c_prime.getattr("cc").unwrap();
    cc.setattr("ccc", Object::new_string("ccc-changed")).unwrap();

    assert_eq!(root.format_json().unwrap(), r#"{"c":{"cc":{"ccc":"ccc"}}}"#);
    assert_eq!(c_prime.format_json().unwrap(), r#"{"cc":{"ccc":"ccc-changed"}}"#);
}

#[test]
fn regexp_search_keep_zero_list_mode() {
    let haystack = Box::new(Literal::new(Object::new_string("foobarbaz")));
    let mut node = RegexpSearch::new(haystack, "(foo)(bar)(baz)", false, true, true);
    node.init(&InitContext).unwrap();
    let result = node.eval(&mut ctx()).unwrap();
    assert_eq!(result.format_json().unwrap(), r#"["foobarbaz","foo","bar","baz"]"#);
}

#[test]
fn regexp_search_optional_group_dict_mode_omits_unset_group() {
    let haystack = Box::new(Literal::new(Object::new_string("bar")));
    let mut node = RegexpSearch::new(haystack, "(?<f>foo)?(?<b>bar)?", false, false, false);
    node.init(&InitContext).unwrap();
    let result = node.eval(&mut ctx()).unwrap();
    assert_eq!(result.getattr("b").unwrap().as_string().unwrap().as_ref(), "bar");
    assert!(result.getattr("f").is_err());
}

#[test]
fn regexp_subst_with_and_without_backreferences() {
    let mut with_groups = RegexpSubst::new(
        Box::new(Literal::new(Object::new_string("25-02-2022"))),
        r"(\d{2})-(\d{2})-(\d{4})",
        r"\3-\2-\1",
        false,
        false,
        true,
    );
    with_groups.init(&InitContext).unwrap();
    assert_eq!(with_groups.eval(&mut ctx()).unwrap().str_repr(), "2022-02-25");

    let mut without_groups = RegexpSubst::new(
        Box::new(Literal::new(Object::new_string("25-02-2022"))),
        r"(\d{2})-(\d{2})-(\d{4})",
        r"\3-\2-\1",
        false,
        false,
        false,
    );
    without_groups.init(&InitContext).unwrap();
    assert_eq!(without_groups.eval(&mut ctx()).unwrap().str_repr(), r"\3-\2-\1");
}

#[test]
fn generator_merge_flattens_two_literal_lists() {
    let lhs = Box::new(LiteralList::new(vec![Box::new(Literal::new(Object::new_string("foo"))), Box::new(Literal::new(Object::new_string("bar")))]));
    let rhs = Box::new(LiteralList::new(vec![Box::new(Literal::new(Object::new_string("baz"))), Box::new(Literal::new(Object::new_string("other")))]));
    let generator = Box::new(PlusGenerator::new(lhs, rhs));
    let node = CreateContainerNew::new(generator);
    let result = node.eval(&mut ctx()).unwrap();
    assert_eq!(result.format_json().unwrap(), r#"["foo","bar","baz","other"]"#);
}

#[test]
fn readonly_blocks_every_mutation_and_leaves_repr_unchanged() {
    let obj = Object::from_json(r#"{"a":1}"#).unwrap();
    obj.make_readonly();
    let before = obj.format_json().unwrap();

    let mut a = obj.clone();
    let set_err = a.set_subscript(&Object::new_string("a"), Object::new_integer(2)).unwrap_err();
    assert_eq!(set_err.kind, FilterxErrorKind::Eval);

    let mut b = obj.clone();
    assert!(!b.unset_key(&Object::new_string("a")).unwrap());
    assert_eq!(obj.format_json().unwrap(), before);
}

#[test]
fn dedup_second_pass_is_a_no_op() {
    let mut storage = filterx_core::DedupStorage::new();
    let a = Object::new_string("same");
    let first = a.dedup(&mut storage);
    let second = first.dedup(&mut storage);
    assert!(first.identity_ptr_eq(&second));
}

#[test]
fn list_negative_index_on_empty_list_errors() {
    let list = Object::new_list();
    let err = list.get_subscript(&Object::new_integer(-1)).unwrap_err();
    assert_eq!(err.kind, FilterxErrorKind::Eval);
}

#[test]
fn plus_string_concat_and_numeric_add_still_fold() {
    let plus = Box::new(Plus::new(Box::new(Literal::new(Object::new_integer(1))), Box::new(Literal::new(Object::new_integer(2)))));
    let folded = plus.optimize().unwrap();
    assert_eq!(folded.literal_value().unwrap().as_integer(), Some(3));
}
