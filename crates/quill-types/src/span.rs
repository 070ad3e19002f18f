use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node came from in source text, as 1-based line and column
/// positions. Nodes that were synthesized rather than parsed (basis
/// definitions, nodes made by tree edits) carry the zero span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    /// True for spans of nodes that did not come from source text.
    pub fn is_synthetic(&self) -> bool {
        *self == Span::default()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_synthetic() {
            return write!(f, "-");
        }
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_display() {
        assert_eq!(Span::new(3, 7, 3, 15).to_string(), "3:7");
        assert_eq!(Span::default().to_string(), "-");
    }

    #[test]
    fn test_span_synthetic() {
        assert!(Span::default().is_synthetic());
        assert!(!Span::new(1, 1, 1, 2).is_synthetic());
    }

    #[test]
    fn test_span_json_field_names() {
        let json = serde_json::to_string(&Span::new(12, 5, 12, 22)).unwrap();
        assert!(json.contains("\"line\":12"));
        assert!(json.contains("\"column\":5"));
        assert!(json.contains("\"end_line\":12"));
        assert!(json.contains("\"end_column\":22"));
    }
}
