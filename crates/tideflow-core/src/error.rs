#![forbid(unsafe_code)]

//! Error types for the reactive engine.
//!
//! None of these errors is fatal to the host. Evaluation and setter failures
//! are caught per node and routed to the diagnostics sink; runaway updates
//! abort a single queue pass. The engine keeps a stale but internally
//! consistent state after every one of them.

use thiserror::Error;

/// Failure returned by an evaluation or inverse (write) function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Create an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for EvalError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors reported to the diagnostics sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// An evaluation function failed. The node kept its previous value.
    #[error("error when evaluating expression \"{expression}\": {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: EvalError,
    },

    /// An inverse function failed. The write was abandoned.
    #[error("error when evaluating setter \"{expression}\": {source}")]
    Setter {
        expression: String,
        #[source]
        source: EvalError,
    },

    /// A node kept re-queueing itself within one flush pass.
    #[error("you may have an infinite update loop for node with expression \"{expression}\" ({count} re-entries)")]
    RunawayUpdate { expression: String, count: usize },
}

impl ReactiveError {
    /// Short machine-readable label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Evaluation { .. } => "evaluation",
            Self::Setter { .. } => "setter",
            Self::RunawayUpdate { .. } => "runaway_update",
        }
    }

    /// The expression text of the node that produced the error.
    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            Self::Evaluation { expression, .. }
            | Self::Setter { expression, .. }
            | Self::RunawayUpdate { expression, .. } => expression,
        }
    }
}
