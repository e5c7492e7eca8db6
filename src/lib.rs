//! FilterX expression-evaluation core: a polymorphic `Object` value model,
//! copy-on-write dict/list containers, an `Expr` tree protocol with literal,
//! container, generator, `+` and regexp nodes, a host function-calling
//! convention, and a cached-JSON-file function (see `DESIGN.md` for the
//! grounding ledger behind each module).
#![expect(clippy::module_name_repetitions, reason = "Object/Expr naming mirrors the domain vocabulary throughout")]

mod cache_json;
mod containers;
mod context;
mod dedup;
mod error;
mod expr;
mod function;
mod object;
mod reference;
mod types;

pub use crate::{
    cache_json::CacheJsonFile,
    containers::{DictObject, ListObject, MAX_LEN},
    context::{EvalContext, FailureInfoEntry, Scope},
    dedup::DedupStorage,
    error::{FilterxError, FilterxErrorKind, RunResult},
    expr::{
        Expr, GeneratorExpr, InitContext,
        container::{DictElement, LiteralDict, LiteralList},
        generator::CreateContainerNew,
        literal::Literal,
        plus::{Plus, PlusGenerator},
        regexp::{RegexpMatch, RegexpSearch, RegexpSubst, regexp_search_ctor, regexp_subst_ctor},
    },
    function::{
        FailureInfo, FailureInfoClear, FailureInfoEnable, FailureInfoMeta, FunctionArgs, FunctionCtor,
        GeneratorFunctionCtor, PathLookup, SimpleFunction, build_function_call, build_generator_function_call,
        lookup_function_ctor, lookup_generator_function_ctor, lookup_simple_function, path_lookup_ctor,
        register_function_ctor, register_generator_function_ctor, register_simple_function,
        simple_function_argument_error,
    },
    object::Object,
    reference::{cow_fork, cow_store, ref_values_equal},
    types::{TypeDescriptor, is_subtype, lookup_type, register_type},
};

/// Registers every built-in function-node ctor this crate ships
/// (`regexp_search`, `regexp_subst`, `path_lookup`, `cache_json_file`, the
/// `failure_info*` family), mirroring the original's static plugin-module
/// registration that runs once per process (spec §6.3). Idempotent: later
/// calls after the first are no-ops, since the registries themselves reject
/// duplicate names and this would otherwise make re-running it in a test
/// binary fail.
pub fn filterx_global_init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        function::register_builtins().expect("built-in function registration must not collide on first init");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_init_registers_builtins_idempotently() {
        filterx_global_init();
        filterx_global_init();
        assert!(lookup_function_ctor("regexp_search").is_some());
        assert!(lookup_function_ctor("cache_json_file").is_some());
        assert!(lookup_function_ctor("failure_info").is_some());
    }
}
