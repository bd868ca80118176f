//! Diagnostic model produced by the dispatcher

use serde::{Deserialize, Serialize};

use super::location::{LinePos, Span};

/// One diagnostic entry tagged to a source file.
///
/// The byte span is authoritative; `position` is a line/column rendering
/// computed against the buffer contents when the buffer collaborator can
/// resolve the file, and absent otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<LinePos>,
}

impl Diagnostic {
    pub fn new(span: Span, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            span,
            severity,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: LinePos) -> Self {
        self.position = Some(position);
        self
    }
}

/// Severity levels carried in compile-result error blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Parse from the protocol's severity letter.
    ///
    /// Fatal and exception reports both surface as errors; anything
    /// unrecognized is downgraded to a warning rather than rejected.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "E" | "X" => Self::Error,
            "I" => Self::Info,
            _ => Self::Warning,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warning" | "warn" | "w" => Ok(Self::Warning),
            "info" | "information" | "i" => Ok(Self::Info),
            _ => Err(format!(
                "Unknown severity: '{}'. Valid: error, warning, info",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_tag() {
        assert_eq!(Severity::from_tag("E"), Severity::Error);
        assert_eq!(Severity::from_tag("X"), Severity::Error);
        assert_eq!(Severity::from_tag("W"), Severity::Warning);
        assert_eq!(Severity::from_tag("I"), Severity::Info);
        // unknown letters degrade to warnings
        assert_eq!(Severity::from_tag("Z"), Severity::Warning);
    }

    #[test]
    fn test_diagnostic_builder() {
        let d = Diagnostic::new(Span::new(10, 20), Severity::Error, "type mismatch")
            .at(LinePos::new(2, 4));
        assert_eq!(d.span.start, 10);
        assert_eq!(d.position.unwrap().line, 2);
    }
}
