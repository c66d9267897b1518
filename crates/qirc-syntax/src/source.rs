//! Byte offset to line/column mapping.

use crate::ast::{Location, Span};

/// Line start table for one source file.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    /// Build the index for `source`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| (i + 1) as u32),
        );
        Self { line_starts }
    }

    /// Resolve a byte offset to a 1-based location.
    #[allow(clippy::cast_possible_truncation)]
    pub fn location(&self, offset: u32) -> Location {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Location {
            line: line as u32 + 1,
            column: offset - self.line_starts[line] + 1,
        }
    }

    /// Resolve the start of a span.
    pub fn span_location(&self, span: Span) -> Location {
        self.location(span.lo)
    }
}
