//! Compile result model

use serde::{Deserialize, Serialize};

use super::RequestId;
use super::diagnostic::Diagnostic;

/// Outcome of one compile request, as decoded from a compile-family markup
/// unit.
///
/// `is_failure` marks a top-level failure: the compiler could not process the
/// buffer at all, as opposed to processing it and reporting diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    pub request_id: RequestId,
    /// Parse identifier assigned by the compiler; follow-up queries against
    /// the same buffer carry it as their correlation key.
    pub parse_id: String,
    pub is_failure: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn is_clean(&self) -> bool {
        !self.is_failure && self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == crate::models::Severity::Error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, Span};

    #[test]
    fn test_clean_result() {
        let r = CompileResult {
            request_id: RequestId(1),
            parse_id: "p1".into(),
            is_failure: false,
            diagnostics: vec![],
        };
        assert!(r.is_clean());
        assert_eq!(r.error_count(), 0);
    }

    #[test]
    fn test_error_count() {
        let r = CompileResult {
            request_id: RequestId(2),
            parse_id: "p2".into(),
            is_failure: false,
            diagnostics: vec![
                Diagnostic::new(Span::new(0, 4), Severity::Warning, "unused"),
                Diagnostic::new(Span::new(10, 20), Severity::Error, "type mismatch"),
            ],
        };
        assert!(!r.is_clean());
        assert_eq!(r.error_count(), 1);
    }
}
