//! Span and location types shared across the engine

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` within a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// Line/column position of a byte offset, both zero-based.
///
/// `end_column` is only set when the position's span ends on the same line,
/// matching how error-list consumers highlight single-line ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePos {
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

impl LinePos {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            end_column: None,
        }
    }

    pub fn with_end(mut self, end_column: u32) -> Self {
        self.end_column = Some(end_column);
        self
    }
}

/// Cross-file target of a location query: where a name was declared, opened,
/// or where its parent structure lives.
///
/// `line` is the value the compiler sent; consumers recompute line/column
/// from the byte span against the actual buffer contents, since the two can
/// disagree when the buffer changed after the compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLocation {
    pub file: String,
    pub line: u64,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_len() {
        assert_eq!(Span::new(10, 20).len(), 10);
        assert_eq!(Span::new(5, 5).len(), 0);
        assert!(Span::new(7, 3).is_empty());
    }

    #[test]
    fn test_line_pos_end_column() {
        let pos = LinePos::new(3, 4).with_end(9);
        assert_eq!(pos.end_column, Some(9));
        assert_eq!(LinePos::new(0, 0).end_column, None);
    }
}
