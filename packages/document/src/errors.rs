//! Error types for the document package

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Node no longer exists in the document")]
    NodeGone,

    #[error("Node is not an element")]
    NotAnElement,

    #[error("Node is not text")]
    NotText,
}

impl DocumentError {
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        DocumentError::Parse {
            offset,
            message: message.into(),
        }
    }
}
