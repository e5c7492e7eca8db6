//! Error taxonomy for the FilterX evaluation core (spec §7).
//!
//! Four kinds of failure can occur: argument errors (function construction),
//! initialization errors (`Expr::init`), eval errors (runtime), and internal
//! errors (invariant violations that must not occur on well-formed input).

use std::fmt;

use strum::{Display, EnumString};

/// The coarse failure category, used to decide propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum FilterxErrorKind {
    /// Function-builder rejected its arguments at construction time.
    Argument,
    /// `Expr::init` failed (regexp compile, non-literal where literal required, ...).
    Initialization,
    /// Runtime evaluation failure (type mismatch, readonly violation, ...).
    Eval,
    /// Assertion-level invariant violation; must not occur on well-formed input.
    Internal,
}

/// A single annotated error frame, the unit pushed onto `EvalContext`'s error
/// stack (spec §4.10/§7).
#[derive(Debug, Clone)]
pub struct FilterxError {
    pub kind: FilterxErrorKind,
    /// Static summary, e.g. "readonly", "key not set", "invalid fillable type".
    pub summary: &'static str,
    /// Type name of the expression that raised this, if known.
    pub expr_type: Option<&'static str>,
    /// Human-readable source location, if known.
    pub location: Option<String>,
    /// Extra detail string (owned or borrowed upstream error text).
    pub detail: Option<String>,
}

impl FilterxError {
    #[must_use]
    pub fn new(kind: FilterxErrorKind, summary: &'static str) -> Self {
        Self { kind, summary, expr_type: None, location: None, detail: None }
    }

    #[must_use]
    pub fn argument(summary: &'static str) -> Self {
        Self::new(FilterxErrorKind::Argument, summary)
    }

    #[must_use]
    pub fn init(summary: &'static str) -> Self {
        Self::new(FilterxErrorKind::Initialization, summary)
    }

    #[must_use]
    pub fn eval(summary: &'static str) -> Self {
        Self::new(FilterxErrorKind::Eval, summary)
    }

    #[must_use]
    pub fn internal(summary: &'static str) -> Self {
        Self::new(FilterxErrorKind::Internal, summary)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_expr_type(mut self, expr_type: &'static str) -> Self {
        self.expr_type = Some(expr_type);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Wraps this error as context for a child failure, mirroring
    /// `push_error_static_info(summary, expr, detail)` (spec §7).
    #[must_use]
    pub fn wrap(summary: &'static str, expr_type: Option<&'static str>, child: &Self) -> Self {
        let detail = format!("{child}");
        Self { kind: child.kind, summary, expr_type, location: None, detail: Some(detail) }
    }
}

impl fmt::Display for FilterxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        if let Some(expr_type) = self.expr_type {
            write!(f, " (in {expr_type})")?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": because {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FilterxError {}

/// Result alias used throughout the evaluation core.
pub type RunResult<T> = Result<T, FilterxError>;
