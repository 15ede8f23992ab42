//! The closed instruction set executed against the capability surface.
//!
//! Model-supplied operations arrive as a JSON array and are parsed into
//! this grammar; there is no dynamic evaluation path, so an operation the
//! grammar cannot express cannot run. The textual denylist from the
//! original design is kept as a prefilter over the raw payload: a payload
//! smuggling dynamic-evaluation or network tokens is rejected before
//! parsing, and the rejection is surfaced, never retried.

use serde::{Deserialize, Serialize};

use pagesmith_document::Criterion;

use crate::errors::AssistError;

/// Token patterns rejected outright in an operations payload.
const DENYLIST: &[&str] = &[
    "eval(",
    "new function",
    "settimeout",
    "setinterval",
    "fetch(",
    "xmlhttprequest",
    "websocket",
    "import(",
    "require(",
];

/// One operation against the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum Operation {
    SetContent {
        target: Criterion,
        value: String,
    },
    SetAttribute {
        target: Criterion,
        name: String,
        value: String,
    },
    SetStyle {
        target: Criterion,
        property: String,
        value: String,
    },
    AddClass {
        target: Criterion,
        class: String,
    },
    RemoveClass {
        target: Criterion,
        class: String,
    },
    RemoveNode {
        target: Criterion,
    },
    ClearChildren {
        target: Criterion,
    },
}

impl Operation {
    pub fn target(&self) -> &Criterion {
        match self {
            Operation::SetContent { target, .. }
            | Operation::SetAttribute { target, .. }
            | Operation::SetStyle { target, .. }
            | Operation::AddClass { target, .. }
            | Operation::RemoveClass { target, .. }
            | Operation::RemoveNode { target }
            | Operation::ClearChildren { target } => target,
        }
    }

    /// Destructive operations are permitted (some instructions legitimately
    /// require removal) but logged by the executor.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Operation::RemoveNode { .. } | Operation::ClearChildren { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::SetContent { .. } => "setContent",
            Operation::SetAttribute { .. } => "setAttribute",
            Operation::SetStyle { .. } => "setStyle",
            Operation::AddClass { .. } => "addClass",
            Operation::RemoveClass { .. } => "removeClass",
            Operation::RemoveNode { .. } => "removeNode",
            Operation::ClearChildren { .. } => "clearChildren",
        }
    }
}

/// Reject the raw payload if it carries any denylisted primitive.
pub fn screen_raw_operations(raw: &serde_json::Value) -> Result<(), AssistError> {
    let haystack = raw.to_string().to_lowercase();
    for token in DENYLIST {
        if haystack.contains(token) {
            return Err(AssistError::UnsafeInstruction {
                token: (*token).to_string(),
            });
        }
    }
    Ok(())
}

/// Parse the wire `operations` array into the closed grammar.
pub fn parse_operations(raw: &serde_json::Value) -> Result<Vec<Operation>, AssistError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| AssistError::MalformedOperations(e.to_string()))
}
