//! Diagnostics and internal error types.
//!
//! Two tiers, per §7: a `thiserror`-based [`CoreError`] for conditions that
//! abort the current subtree (symbol lookup failure, internal-consistency
//! failure), and an accumulating [`Diagnostics`] sink for the best-effort
//! compiler-message stream that lets the driver run every pass to completion
//! and only suppress final emission if anything was reported as an error.

use std::fmt;

use thiserror::Error;

/// Severity of a single diagnostic (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Increments the error counter; final emission is suppressed.
    Error,
    /// Advisory only.
    Warning,
}

/// One reported diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Source line, when an AST reference was available.
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{tag}:{line}: {}", self.message),
            None => write!(f, "{tag}: {}", self.message),
        }
    }
}

/// Accumulates diagnostics across a whole compilation run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reports: Vec<Diagnostic>,
    error_count: u32,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, line: Option<u32>, message: impl Into<String>) {
        self.error_count += 1;
        self.reports.push(Diagnostic {
            severity: Severity::Error,
            line,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, line: Option<u32>, message: impl Into<String>) {
        self.reports.push(Diagnostic {
            severity: Severity::Warning,
            line,
            message: message.into(),
        });
    }

    /// True once any [`Severity::Error`] has been reported; emission should
    /// be suppressed when this holds.
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn reports(&self) -> &[Diagnostic] {
        &self.reports
    }
}

/// Internal-consistency and resource-exhaustion failures.
///
/// These are reported through [`Diagnostics`] by callers (§7: "also
/// reported as `ERROR`, not fatal asserts"); the variants here exist so
/// fallible internal APIs have a concrete type to return with `?` before
/// the call site decides how to surface it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An AST node had an unexpected `kind` after a pass that must have
    /// normalised it away.
    #[error("internal error: unexpected AST shape in {pass}: {detail}")]
    UnexpectedShape { pass: &'static str, detail: String },

    /// Symbol lookup failed in a position where a fallback isn't possible
    /// (object reference, method lookup, case item).
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),

    /// `@@@label` used before `dat_offset` layout has run (§5).
    #[error("label address of `{0}` used before DAT layout")]
    LabelNotLaidOut(String),

    /// The Nu bytecode pool overflowed its 32K-entry arena (§4.3 Failure
    /// semantics: "Overflow ... is a compilation error").
    #[error("internal error, too many bytecodes")]
    TooManyBytecodes,

    /// `DEBUG` table size exceeded [`crate::consts::DEBUG_CEILING`].
    #[error("debug table too large: {size:#x} bytes exceeds cap {cap:#x}")]
    DebugTableOverflow { size: usize, cap: usize },
}
