//! Document-level errors.
//!
//! Either error aborts ingestion of the affected document only; callers
//! running a multi-source ingestion keep processing the other sources.

use thiserror::Error;

use crate::model::NodeKind;

/// Malformed markup, with the position where reading failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed markup at line {line} (byte {offset}): {message}")]
pub struct ParseError {
    pub offset: u64,
    pub line: usize,
    pub message: String,
}

impl ParseError {
    /// Build an error at `offset`, deriving the 1-based line from `input`.
    pub fn at(input: &[u8], offset: u64, message: impl Into<String>) -> Self {
        let end = usize::try_from(offset).unwrap_or(usize::MAX).min(input.len());
        let line = input[..end].iter().filter(|&&b| b == b'\n').count() + 1;
        Self {
            offset,
            line,
            message: message.into(),
        }
    }
}

/// A structural node lacks the label its kind mandates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} without a label under '{parent_reference}' (byte {offset})")]
pub struct StructuralIntegrityError {
    pub kind: NodeKind,
    /// Reference of the enclosing node, empty at document level.
    pub parent_reference: String,
    pub offset: u64,
}

/// Failure to turn one source document into a structure tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("failed to parse source '{document}': {error}")]
    Parse {
        document: String,
        #[source]
        error: ParseError,
    },
    #[error("source '{document}' is structurally corrupt: {error}")]
    Structure {
        document: String,
        #[source]
        error: StructuralIntegrityError,
    },
}

impl DocumentError {
    /// Logical source name of the failed document.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::Parse { document, .. } | DocumentError::Structure { document, .. } => {
                document
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_derived_from_offset() {
        let input = b"<a>\n<b>\n</a>";
        let err = ParseError::at(input, 8, "mismatched end tag");
        assert_eq!(err.line, 3);
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_offset_past_end_is_clamped() {
        let err = ParseError::at(b"<a>\n", 99, "unexpected end of input");
        assert_eq!(err.line, 2);
        assert_eq!(err.offset, 99);
    }
}
