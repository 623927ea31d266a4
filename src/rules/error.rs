//! Error types raised while building a rule session
//!
//! Resolution itself never fails; only condition compilation and rule
//! document loading can.

use thiserror::Error;

/// Condition text the evaluator could not compile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct ConditionError {
    pub message: String,
    /// Byte offset into the condition text
    pub offset: usize,
}

impl ConditionError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A rule whose condition (or assertion test) failed to compile
///
/// Fatal to the session being built; the engine falls back to the implicit
/// rule set and then hands this error back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule '{rule}': cannot compile '{expression}': {source}")]
pub struct CompileError {
    pub rule: String,
    pub expression: String,
    #[source]
    pub source: ConditionError,
}

/// Malformed authored rule document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleDocumentError {
    #[error("rule document syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
    #[error("unsupported rule document version {0}")]
    UnsupportedVersion(u32),
}
