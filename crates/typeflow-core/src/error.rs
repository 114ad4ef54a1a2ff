//! Error types for the type-flow analyzer
//!
//! Every variant is an internal defect or a driver condition, never a
//! diagnostic about the analysed program: imprecision degrades to AnyType
//! silently instead of producing an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("representation violation: {0}")]
    Representation(String),

    #[error("array keys requested on non-array type reference `{0}`")]
    NotAnArray(String),

    #[error("lambda signature requested on non-callable type reference `{0}`")]
    NotCallable(String),

    #[error("type slot {slot} is beyond the context table (len {len})")]
    SlotOutOfRange { slot: u32, len: usize },

    #[error("mask from context {found} used with context {expected} without transfer")]
    ForeignContext { expected: u64, found: u64 },

    #[error("flow state stamped at version {stamped} is stale (context version {current})")]
    StaleFlowState { stamped: u32, current: u32 },

    #[error("unsupported literal kind `{0}` reached the type evaluator")]
    UnsupportedLiteral(String),

    #[error("unknown routine id {0}")]
    UnknownRoutine(u32),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Whether this error reflects an inconsistency inside the analyzer itself
    pub fn is_internal(&self) -> bool {
        !matches!(self, AnalysisError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
