//! Error taxonomy for the assist pipeline.
//!
//! Two audiences, two channels: `Display` carries the technical detail and
//! goes to logs; [`AssistError::user_message`] returns the simplified text
//! shown in the editor. Cancellations are silent and have no user message.

use pagesmith_document::DocumentError;
use thiserror::Error;

/// Why an imperative edit produced no observable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoEffectDiagnostic {
    /// The operations never looked anything up.
    NoLookupAttempted,
    /// Lookups ran but matched zero nodes.
    NothingMatched,
    /// Lookups matched nodes but none were mutated.
    MatchedButUnmodified { matched: usize },
    /// Catch-all.
    Unknown,
}

impl NoEffectDiagnostic {
    pub fn user_message(&self) -> String {
        match self {
            NoEffectDiagnostic::NoLookupAttempted => {
                "couldn't find what you're looking for, be more specific or select the element first"
                    .to_string()
            }
            NoEffectDiagnostic::NothingMatched => "couldn't find that element".to_string(),
            NoEffectDiagnostic::MatchedButUnmodified { matched } => format!(
                "found {} element(s) but couldn't modify them, try selecting it first",
                matched
            ),
            NoEffectDiagnostic::Unknown => "couldn't make that change".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AssistError {
    /// Denylisted primitive detected in model-supplied operations. Fatal
    /// for the attempt, never retried, always surfaced.
    #[error("unsafe instruction rejected ({token} in operations payload)")]
    UnsafeInstruction { token: String },

    /// Executed without throwing but verification found no change.
    #[error("execution had no observable effect: {diagnostic:?}")]
    NoEffect { diagnostic: NoEffectDiagnostic },

    /// The fallback mutator found no applicable pattern.
    #[error("textual fallback exhausted for explanation: {explanation:?}")]
    FallbackExhausted { explanation: String },

    /// Upstream usage-cap condition. Never retried.
    #[error("upstream quota exhausted: {message}")]
    QuotaExceeded { message: String },

    /// Network/connection failure. Retried with backoff up to a ceiling.
    #[error("transient upstream failure after {retries} retries: {message}")]
    Transient { message: String, retries: u32 },

    /// Superseded by a newer request or explicit cancellation. Silent.
    #[error("request cancelled")]
    Cancelled,

    /// The mutation applied but persistence failed. Reported distinctly so
    /// the user is never told an applied change was lost.
    #[error("save failed after applying changes: {message}")]
    SaveFailed { message: String },

    #[error("malformed operations payload: {0}")]
    MalformedOperations(String),

    #[error("upstream response carried no usable suggestion")]
    EmptySuggestion,

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl AssistError {
    pub fn transient(message: impl Into<String>) -> Self {
        AssistError::Transient {
            message: message.into(),
            retries: 0,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AssistError::Transient { .. })
    }

    /// Simplified, non-technical text for the editor UI. `None` means the
    /// condition is silent (cancellation).
    pub fn user_message(&self) -> Option<String> {
        match self {
            AssistError::UnsafeInstruction { .. } => {
                Some("that suggestion tried to do something unsafe and was blocked".to_string())
            }
            AssistError::NoEffect { diagnostic } => Some(diagnostic.user_message()),
            AssistError::FallbackExhausted { .. } => {
                Some("couldn't complete that request".to_string())
            }
            AssistError::QuotaExceeded { .. } => {
                Some("you've reached your AI usage limit".to_string())
            }
            AssistError::Transient { .. } => {
                Some("couldn't reach the assistant, please try again".to_string())
            }
            AssistError::Cancelled => None,
            AssistError::SaveFailed { .. } => {
                Some("your change was applied but couldn't be saved".to_string())
            }
            AssistError::MalformedOperations(_)
            | AssistError::EmptySuggestion
            | AssistError::Document(_) => Some("couldn't make that change".to_string()),
        }
    }
}
