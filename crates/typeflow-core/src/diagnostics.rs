//! Internal diagnostics collected during a session
//!
//! Only analyzer defects land here. Imprecision is never reported.

use crate::hir::{Span, Symbol};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// An analyzer invariant broke; the routine fell back to AnyType
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub routine: Symbol,
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::InternalError => "internal error",
        };
        write!(
            f,
            "{level} in `{}` [{}..{}]: {}",
            self.routine, self.span.start, self.span.end, self.message
        )
    }
}

/// Thread-safe diagnostic collector shared by all routine workers
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }

    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let diagnostic = Diagnostic {
            severity: Severity::InternalError,
            routine: "f".to_string(),
            span: Span::new(3, 9),
            message: "unsupported literal".to_string(),
        };
        assert_eq!(diagnostic.to_string(), "internal error in `f` [3..9]: unsupported literal");

        let sink = DiagnosticSink::new();
        sink.push(diagnostic.clone());
        assert_eq!(sink.snapshot(), vec![diagnostic]);
    }
}
