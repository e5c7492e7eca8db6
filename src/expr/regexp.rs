//! PCRE-style regexp nodes (spec §4.5): match (`=~`/`!~`), `regexp_search`,
//! `regexp_subst`. Grounded on `expr-regexp.c`, `expr-regexp-common.c`,
//! `expr-regexp-search.c`, `expr-regexp-subst.c`, backed by `fancy_regex`
//! rather than PCRE directly (closest crate in the pack's stack with
//! backtracking-regex features like backreferences and lookaround).

use fancy_regex::{Captures, RegexBuilder};

use crate::context::EvalContext;
use crate::error::{FilterxError, RunResult};
use crate::expr::{Expr, InitContext};
use crate::object::Object;

/// The original's ovector is sized for a compile-time-fixed 256 capture
/// groups plus the whole match; a pattern that defines more overflows it at
/// match time rather than at compile time (spec §9 boundary case).
const MAX_CAPTURE_GROUPS: usize = 256;

struct CompiledPattern {
    regex: fancy_regex::Regex,
    /// Index 0 is the whole match (always `None`); entries beyond that hold
    /// a named group's name, if any.
    group_names: Vec<Option<String>>,
}

fn compile_pattern(pattern: &str, ignore_case: bool) -> RunResult<CompiledPattern> {
    let mut builder = RegexBuilder::new(pattern);
    builder.case_insensitive(ignore_case);
    let regex = builder
        .build()
        .map_err(|e| FilterxError::init("invalid regexp pattern").with_detail(e.to_string()))?;
    let group_names: Vec<Option<String>> = regex.capture_names().map(|n| n.map(str::to_owned)).collect();
    Ok(CompiledPattern { regex, group_names })
}

fn check_group_limit(compiled: &CompiledPattern) -> RunResult<()> {
    if compiled.group_names.len() > MAX_CAPTURE_GROUPS + 1 {
        return Err(FilterxError::eval("too many capture groups")
            .with_detail(format!("pattern defines more than {MAX_CAPTURE_GROUPS} capture groups")));
    }
    Ok(())
}

fn eval_haystack(expr: &dyn Expr, ctx: &mut EvalContext, type_name: &'static str) -> RunResult<std::rc::Rc<str>> {
    let value = expr.eval(ctx)?;
    value.as_string().ok_or_else(|| FilterxError::eval("regexp operand must be a string").with_expr_type(type_name))
}

// --- `=~` / `!~` ---------------------------------------------------------

/// Regexp match node (spec §4.5): `negate` distinguishes `=~` from `!~`.
#[derive(Debug)]
pub struct RegexpMatch {
    haystack: Box<dyn Expr>,
    pattern: String,
    ignore_case: bool,
    negate: bool,
    compiled: Option<CompiledPatternHandle>,
}

/// `fancy_regex::Regex` isn't `Debug`; this newtype just supplies a stub
/// impl so `RegexpMatch`/`RegexpSearch`/`RegexpSubst` can still derive it
/// for error messages and test assertions.
struct CompiledPatternHandle(CompiledPattern);

impl std::fmt::Debug for CompiledPatternHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompiledPattern(..)")
    }
}

impl RegexpMatch {
    #[must_use]
    pub fn new(haystack: Box<dyn Expr>, pattern: impl Into<String>, ignore_case: bool, negate: bool) -> Self {
        Self { haystack, pattern: pattern.into(), ignore_case, negate, compiled: None }
    }
}

impl Expr for RegexpMatch {
    fn type_name(&self) -> &'static str {
        "regexp_match"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.haystack.init(cfg)?;
        match compile_pattern(&self.pattern, self.ignore_case) {
            Ok(compiled) => {
                self.compiled = Some(CompiledPatternHandle(compiled));
                Ok(())
            }
            Err(e) => {
                self.haystack.deinit();
                Err(e)
            }
        }
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let compiled = self.compiled.as_ref().ok_or_else(|| FilterxError::internal("regexp_match evaluated before init"))?;
        let text = eval_haystack(self.haystack.as_ref(), ctx, self.type_name())?;
        let is_match = compiled
            .0
            .regex
            .is_match(&text)
            .map_err(|e| FilterxError::eval("regexp match failure").with_detail(e.to_string()))?;
        Ok(Object::new_bool(is_match != self.negate))
    }

    fn deinit(&mut self) {
        self.compiled = None;
        self.haystack.deinit();
    }
}

// --- `regexp_search` ------------------------------------------------------

/// `regexp_search(haystack, pattern, ...)` (spec §4.5, `expr-regexp-search.c`).
#[derive(Debug)]
pub struct RegexpSearch {
    haystack: Box<dyn Expr>,
    pattern: String,
    ignore_case: bool,
    /// Include group 0 (the whole match) in the result alongside the
    /// numbered/named capture groups.
    keep_zero: bool,
    /// `true`: result is a list indexed by group number. `false`: result is
    /// a dict keyed by group name, falling back to the group's numeric
    /// index as a string key for unnamed groups.
    list_mode: bool,
    compiled: Option<CompiledPatternHandle>,
}

impl RegexpSearch {
    #[must_use]
    pub fn new(haystack: Box<dyn Expr>, pattern: impl Into<String>, ignore_case: bool, keep_zero: bool, list_mode: bool) -> Self {
        Self { haystack, pattern: pattern.into(), ignore_case, keep_zero, list_mode, compiled: None }
    }

    fn group_key(compiled: &CompiledPattern, index: usize) -> String {
        compiled.group_names.get(index).and_then(Clone::clone).unwrap_or_else(|| index.to_string())
    }
}

impl Expr for RegexpSearch {
    fn type_name(&self) -> &'static str {
        "regexp_search"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.haystack.init(cfg)?;
        match compile_pattern(&self.pattern, self.ignore_case) {
            Ok(compiled) => {
                self.compiled = Some(CompiledPatternHandle(compiled));
                Ok(())
            }
            Err(e) => {
                self.haystack.deinit();
                Err(e)
            }
        }
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let handle = self.compiled.as_ref().ok_or_else(|| FilterxError::internal("regexp_search evaluated before init"))?;
        let compiled = &handle.0;
        check_group_limit(compiled)?;
        let text = eval_haystack(self.haystack.as_ref(), ctx, self.type_name())?;

        let captures = compiled
            .regex
            .captures(&text)
            .map_err(|e| FilterxError::eval("regexp match failure").with_detail(e.to_string()))?;
        let Some(caps) = captures else {
            return Ok(if self.list_mode { Object::new_list() } else { Object::new_dict() });
        };

        // Group 0 (the whole match) is skipped unless keep_zero was requested
        // or the pattern has no capture groups of its own to report instead.
        let start = if self.keep_zero || caps.len() <= 1 { 0 } else { 1 };
        if self.list_mode {
            let mut list = Object::new_list();
            for i in start..caps.len() {
                let value = caps.get(i).map_or_else(Object::new_null, |m| Object::new_string(m.as_str()));
                list.append(value)?;
            }
            Ok(list)
        } else {
            let mut dict = Object::new_dict();
            for i in start..caps.len() {
                // An unset (non-participating) optional group is omitted
                // entirely rather than stored as null (spec §4.9.2).
                if let Some(m) = caps.get(i) {
                    let key = Self::group_key(compiled, i);
                    dict.setattr(&key, Object::new_string(m.as_str()))?;
                }
            }
            Ok(dict)
        }
    }

    fn deinit(&mut self) {
        self.compiled = None;
        self.haystack.deinit();
    }
}

// --- `regexp_subst` --------------------------------------------------------

/// `regexp_subst(haystack, pattern, replacement, ...)` (spec §4.5,
/// `expr-regexp-subst.c`).
#[derive(Debug)]
pub struct RegexpSubst {
    haystack: Box<dyn Expr>,
    pattern: String,
    replacement: String,
    ignore_case: bool,
    global: bool,
    /// Whether `\N` backreferences in `replacement` are expanded (`false`:
    /// the replacement text is inserted verbatim).
    groups: bool,
    compiled: Option<CompiledPatternHandle>,
}

impl RegexpSubst {
    #[must_use]
    pub fn new(
        haystack: Box<dyn Expr>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
        ignore_case: bool,
        global: bool,
        groups: bool,
    ) -> Self {
        Self { haystack, pattern: pattern.into(), replacement: replacement.into(), ignore_case, global, groups, compiled: None }
    }
}

impl Expr for RegexpSubst {
    fn type_name(&self) -> &'static str {
        "regexp_subst"
    }

    fn init(&mut self, cfg: &InitContext) -> RunResult<()> {
        self.haystack.init(cfg)?;
        match compile_pattern(&self.pattern, self.ignore_case) {
            Ok(compiled) => {
                self.compiled = Some(CompiledPatternHandle(compiled));
                Ok(())
            }
            Err(e) => {
                self.haystack.deinit();
                Err(e)
            }
        }
    }

    fn eval(&self, ctx: &mut EvalContext) -> RunResult<Object> {
        let handle = self.compiled.as_ref().ok_or_else(|| FilterxError::internal("regexp_subst evaluated before init"))?;
        let compiled = &handle.0;
        check_group_limit(compiled)?;
        let text = eval_haystack(self.haystack.as_ref(), ctx, self.type_name())?;
        let text: &str = &text;

        let mut out = String::new();
        let mut pos = 0usize;
        loop {
            if pos > text.len() {
                break;
            }
            let captures = compiled
                .regex
                .captures_from_pos(text, pos)
                .map_err(|e| FilterxError::eval("regexp match failure").with_detail(e.to_string()))?;
            let Some(caps) = captures else {
                out.push_str(&text[pos..]);
                break;
            };
            let whole = caps.get(0).expect("group 0 is always present on a successful match");
            out.push_str(&text[pos..whole.start()]);
            out.push_str(&expand_replacement(&self.replacement, &caps, self.groups));

            if whole.end() == whole.start() {
                // Zero-length match: advance by exactly one Unicode scalar
                // value so substitution can't loop forever. The original
                // advances by one raw byte; doing the same here could split
                // a multi-byte UTF-8 sequence, so this advances by one char
                // instead (spec-compatible deviation, see DESIGN.md).
                match text[whole.end()..].chars().next() {
                    Some(ch) => {
                        out.push(ch);
                        pos = whole.end() + ch.len_utf8();
                    }
                    None => {
                        pos = text.len() + 1;
                        break;
                    }
                }
            } else {
                pos = whole.end();
            }

            if !self.global {
                out.push_str(&text[pos..]);
                break;
            }
        }
        Ok(Object::new_string(out))
    }

    fn deinit(&mut self) {
        self.compiled = None;
        self.haystack.deinit();
    }
}

/// Expands `\N` backreferences (N up to 3 digits) in `template` against
/// `caps` (spec §4.9.3). A reference to an out-of-range group, or to an
/// in-range group that didn't participate in the match (an unset optional
/// group), is left in the output verbatim rather than substituted — the
/// same outcome an ill-formed `\` escape gets.
fn expand_replacement(template: &str, caps: &Captures, groups_enabled: bool) -> String {
    if !groups_enabled {
        return template.to_owned();
    }
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_digit() && j - i <= 3 {
                j += 1;
            }
            let digits: String = chars[i + 1..j].iter().collect();
            let index: usize = digits.parse().expect("scanned only ASCII digits");
            if let Some(m) = caps.get(index) {
                out.push_str(m.as_str());
                i = j;
                continue;
            }
            // Out-of-range or unset group: keep the `\N` text untouched.
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Whether `replacement` contains at least one `\N` token. Used to pick the
/// default of the `groups` flag when the function call didn't set it
/// explicitly: a replacement with no backreference skips the expansion pass
/// entirely for performance (`_contains_match_grp_ref` in the original).
#[must_use]
pub fn contains_match_group_ref(replacement: &str) -> bool {
    let chars: Vec<char> = replacement.chars().collect();
    chars.windows(2).any(|w| w[0] == '\\' && w[1].is_ascii_digit())
}

/// Builds a `regexp_search(string, pattern, keep_zero=.., list_mode=..)`
/// node from its call arguments (spec §4.9.2, `expr-regexp-search.c`'s
/// `_extract_search_args`).
pub fn regexp_search_ctor(mut args: crate::function::FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 2 {
        return Err(FilterxError::argument("regexp_search() takes exactly 2 positional arguments"));
    }
    let keep_zero = args.get_named_literal_boolean("keep_zero")?.unwrap_or(false);
    let list_mode = args.get_named_literal_boolean("list_mode")?.unwrap_or(false);
    let haystack = args.get_expr(0)?;
    let pattern = args.get_literal_string(1)?;
    args.check()?;
    Ok(Box::new(RegexpSearch::new(haystack, pattern, false, keep_zero, list_mode)))
}

/// Builds a `regexp_subst(string, pattern, replacement, ...)` node from its
/// call arguments (spec §4.9.3, `expr-regexp-subst.c`'s `_extract_subst_args`).
///
/// `jit`, `utf8`, and `newline` are accepted (the original PCRE2 compile-flag
/// wiring names them) but have no effect: `fancy_regex` has no JIT toggle,
/// always accepts UTF-8 input, and its newline handling isn't configurable
/// per-call. They are parsed and validated as booleans so a malformed flag
/// still errors, but are otherwise no-ops (documented in DESIGN.md).
pub fn regexp_subst_ctor(mut args: crate::function::FunctionArgs) -> RunResult<Box<dyn Expr>> {
    if args.len() != 3 {
        return Err(FilterxError::argument("regexp_subst() takes exactly 3 positional arguments"));
    }
    let _jit = args.get_named_literal_boolean("jit")?.unwrap_or(true);
    let _utf8 = args.get_named_literal_boolean("utf8")?.unwrap_or(false);
    let ignorecase = args.get_named_literal_boolean("ignorecase")?.unwrap_or(false);
    let _newline = args.get_named_literal_boolean("newline")?.unwrap_or(false);
    let global = args.get_named_literal_boolean("global")?.unwrap_or(false);
    let haystack = args.get_expr(0)?;
    let pattern = args.get_literal_string(1)?;
    let replacement = args.get_literal_string(2)?;
    let groups = args.get_named_literal_boolean("groups")?.unwrap_or_else(|| contains_match_group_ref(&replacement));
    args.check()?;
    Ok(Box::new(RegexpSubst::new(haystack, pattern, replacement, ignorecase, global, groups)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scope;
    use crate::expr::literal::Literal;

    fn haystack(s: &str) -> Box<dyn Expr> {
        Box::new(Literal::new(Object::new_string(s)))
    }

    #[test]
    fn match_node_negates_for_not_tilde() {
        let mut node = RegexpMatch::new(haystack("hello world"), "wor.d", false, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert!(!node.eval(&mut ctx).unwrap().truthy());
    }

    #[test]
    fn search_list_mode_includes_zero_group_when_requested() {
        let mut node = RegexpSearch::new(haystack("key=value"), r"(\w+)=(\w+)", false, true, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        let result = node.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"["key=value","key","value"]"#);
    }

    #[test]
    fn search_dict_mode_uses_named_groups_and_numeric_fallback() {
        let mut node = RegexpSearch::new(haystack("key=value"), r"(?P<k>\w+)=(\w+)", false, false, false);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        let result = node.eval(&mut ctx).unwrap();
        assert_eq!(result.format_json().unwrap(), r#"{"k":"key","2":"value"}"#);
    }

    #[test]
    fn search_with_no_match_returns_empty_dict() {
        let mut node = RegexpSearch::new(haystack("abc"), "xyz", false, false, false);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().format_json().unwrap(), "{}");
    }

    #[test]
    fn search_with_no_match_in_list_mode_returns_empty_list() {
        let mut node = RegexpSearch::new(haystack("abc"), "xyz", false, false, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().format_json().unwrap(), "[]");
    }

    #[test]
    fn search_dict_mode_omits_key_for_unmatched_optional_group() {
        let mut node = RegexpSearch::new(haystack("bar"), "(?<f>foo)?(?<b>bar)?", false, false, false);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().format_json().unwrap(), r#"{"b":"bar"}"#);
    }

    #[test]
    fn search_includes_group_zero_when_pattern_has_no_capture_groups() {
        let mut node = RegexpSearch::new(haystack("foobarbaz"), "bar", false, false, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().format_json().unwrap(), r#"["bar"]"#);
    }

    #[test]
    fn subst_expands_backreferences_globally() {
        let mut node = RegexpSubst::new(haystack("a=1,b=2"), r"(\w)=(\d)", r"\2=\1", false, true, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().str_repr(), "1=a,2=b");
    }

    #[test]
    fn subst_without_groups_inserts_replacement_verbatim() {
        let mut node = RegexpSubst::new(haystack("a=1,b=2"), r"(\w)=(\d)", r"\2=\1", false, true, false);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().str_repr(), r"\2=\1,\2=\1");
    }

    #[test]
    fn subst_date_reorder_with_and_without_groups() {
        let mut with_groups =
            RegexpSubst::new(haystack("25-02-2022"), r"(\d{2})-(\d{2})-(\d{4})", r"\3-\2-\1", false, false, true);
        with_groups.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(with_groups.eval(&mut ctx).unwrap().str_repr(), "2022-02-25");

        let mut without_groups =
            RegexpSubst::new(haystack("25-02-2022"), r"(\d{2})-(\d{2})-(\d{4})", r"\3-\2-\1", false, false, false);
        without_groups.init(&InitContext).unwrap();
        assert_eq!(without_groups.eval(&mut ctx).unwrap().str_repr(), r"\3-\2-\1");
    }

    #[test]
    fn subst_leaves_out_of_range_group_reference_verbatim() {
        let mut node = RegexpSubst::new(haystack("ab"), r"(a)(b)", r"\9-\1", false, false, true);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().str_repr(), r"\9-a");
    }

    #[test]
    fn subst_zero_length_match_does_not_loop_forever() {
        let mut node = RegexpSubst::new(haystack("abc"), "x*", "-", false, true, false);
        node.init(&InitContext).unwrap();
        let mut ctx = EvalContext::new(Scope::empty());
        assert_eq!(node.eval(&mut ctx).unwrap().str_repr(), "-a-b-c-");
    }
}
