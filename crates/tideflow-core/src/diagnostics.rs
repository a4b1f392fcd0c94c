#![forbid(unsafe_code)]

//! Diagnostics sink: where caught engine errors end up.
//!
//! The engine never panics or propagates on evaluation, setter, or runaway
//! failures. It hands a [`Diagnostic`] to the thread's installed
//! [`DiagnosticsSink`] and carries on. The default sink is [`TracingSink`],
//! which logs each diagnostic as a structured `WARN` event. Tests and tools
//! install a [`RecordingSink`] to assert on what was reported.

use std::cell::RefCell;

use crate::error::ReactiveError;

/// One reported failure plus the context it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What went wrong.
    pub error: ReactiveError,
    /// Label of the owning scope, when known.
    pub context: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic for the given error.
    #[must_use]
    pub fn new(error: ReactiveError, context: Option<String>) -> Self {
        Self { error, context }
    }
}

/// Receiver for engine diagnostics.
pub trait DiagnosticsSink {
    /// Accept one diagnostic. Must not panic.
    fn report(&self, diagnostic: Diagnostic);
}

/// Sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            target: "tideflow::diagnostics",
            kind = diagnostic.error.kind(),
            expression = diagnostic.error.expression(),
            context = diagnostic.context.as_deref().unwrap_or("<none>"),
            "{}",
            diagnostic.error
        );
    }
}

/// Sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: RefCell<Vec<Diagnostic>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().clone()
    }

    /// Number of recorded diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of recorded diagnostics of the given [`ReactiveError::kind`].
    #[must_use]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|d| d.error.kind() == kind)
            .count()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl DiagnosticsSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries.borrow_mut().push(diagnostic);
    }
}
