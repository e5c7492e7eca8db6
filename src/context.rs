//! Per-evaluation mutable state: scope handle, error stack, failure-info
//! collection (spec §4.10, §7).

use crate::error::FilterxError;
use crate::object::Object;

/// Opaque handle onto the log record being evaluated (spec §4.10's
/// "Scope"). The core never interprets its contents; it only threads the
/// handle through so host-registered functions (§6.3) can reach it.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    record: Option<Object>,
}

impl Scope {
    #[must_use]
    pub fn new(record: Object) -> Self {
        Self { record: Some(record) }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { record: None }
    }

    #[must_use]
    pub fn record(&self) -> Option<&Object> {
        self.record.as_ref()
    }
}

/// One captured failure (spec §4.10's "Failure-info collection").
#[derive(Debug, Clone)]
pub struct FailureInfoEntry {
    pub location: String,
    pub source_text: String,
    pub error: String,
    pub meta: Option<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureInfoMode {
    Disabled,
    /// Record regardless of the evaluation's truthy/falsy outcome
    /// (`collect_falsy=true`: "both truthy and falsy").
    All,
    /// Record only when the evaluation's outcome is truthy — the default
    /// (`collect_falsy=false`).
    TruthyOnly,
}

/// Per-evaluation state threaded through `Expr::eval` (spec §4.10).
pub struct EvalContext {
    pub scope: Scope,
    errors: Vec<FilterxError>,
    failure_info: Vec<FailureInfoEntry>,
    failure_info_mode: FailureInfoMode,
    current_frame_meta: Option<Object>,
}

impl EvalContext {
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            errors: Vec::new(),
            failure_info: Vec::new(),
            failure_info_mode: FailureInfoMode::Disabled,
            current_frame_meta: None,
        }
    }

    // --- Error stack (spec §4.10/§7) -------------------------------------

    pub fn push_error(&mut self, error: FilterxError) {
        self.errors.push(error);
    }

    /// `push_error_static_info(summary, expr, detail)`: wraps the most
    /// recent error (if any) as context for a higher-level failure.
    pub fn push_error_static_info(&mut self, summary: &'static str, expr_type: Option<&'static str>, detail: impl Into<String>) {
        let detail = detail.into();
        let wrapped = match self.errors.last() {
            Some(child) => FilterxError::wrap(summary, expr_type, child),
            None => FilterxError::eval(summary).with_detail(detail.clone()),
        };
        self.errors.push(wrapped.with_detail(detail));
    }

    #[must_use]
    pub fn drain_errors(&mut self) -> Vec<FilterxError> {
        std::mem::take(&mut self.errors)
    }

    #[must_use]
    pub fn format_errors(&self) -> String {
        self.errors.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join("; ")
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // --- Failure-info collection (spec §4.10) ----------------------------

    pub fn enable_failure_info(&mut self, collect_falsy: bool) {
        self.failure_info_mode = if collect_falsy { FailureInfoMode::All } else { FailureInfoMode::TruthyOnly };
    }

    #[must_use]
    pub fn failure_info_enabled(&self) -> bool {
        self.failure_info_mode != FailureInfoMode::Disabled
    }

    pub fn clear_failure_info(&mut self) {
        self.failure_info.clear();
        self.current_frame_meta = None;
    }

    #[must_use]
    pub fn failure_info(&self) -> &[FailureInfoEntry] {
        &self.failure_info
    }

    /// Only settable while failure-info collection is enabled (spec §4.10's
    /// "Current frame metadata").
    pub fn set_current_frame_meta(&mut self, meta: Object) {
        if self.failure_info_enabled() {
            self.current_frame_meta = Some(meta);
        }
    }

    /// Records one failure-info entry if collection is enabled and the
    /// mode/result combination calls for it: `All` records every evaluation
    /// outcome passed in; `TruthyOnly` records only when `result_truthy` is
    /// `Some(true)` (spec §4.10: "only when the result is truthy vs. both
    /// truthy and falsy (`collect_falsy`)").
    pub fn maybe_record_failure(&mut self, location: String, source_text: String, error: String, result_truthy: Option<bool>) {
        let should_record = match self.failure_info_mode {
            FailureInfoMode::Disabled => false,
            FailureInfoMode::All => true,
            FailureInfoMode::TruthyOnly => result_truthy == Some(true),
        };
        if !should_record {
            return;
        }
        let meta = self.current_frame_meta.take();
        self.failure_info.push(FailureInfoEntry { location, source_text, error, meta });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_stack_wraps_child_context() {
        let mut ctx = EvalContext::new(Scope::empty());
        ctx.push_error(FilterxError::eval("readonly"));
        ctx.push_error_static_info("Failed to set key", Some("literal_dict"), "container is readonly");
        assert_eq!(ctx.drain_errors().len(), 2);
        assert!(!ctx.has_errors());
    }

    #[test]
    fn failure_info_default_mode_collects_truthy_only() {
        let mut ctx = EvalContext::new(Scope::empty());
        ctx.enable_failure_info(false);
        ctx.maybe_record_failure("loc".into(), "src".into(), "err".into(), Some(false));
        assert!(ctx.failure_info().is_empty());
        ctx.maybe_record_failure("loc".into(), "src".into(), "err".into(), Some(true));
        assert_eq!(ctx.failure_info().len(), 1);
    }

    #[test]
    fn failure_info_collect_falsy_mode_records_both() {
        let mut ctx = EvalContext::new(Scope::empty());
        ctx.enable_failure_info(true);
        ctx.maybe_record_failure("loc".into(), "src".into(), "err".into(), Some(true));
        ctx.maybe_record_failure("loc".into(), "src".into(), "err".into(), Some(false));
        assert_eq!(ctx.failure_info().len(), 2);
    }
}
