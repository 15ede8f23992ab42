//! Context Builder: assembles the bounded natural-language prompt.
//!
//! Pure function of its inputs. The executor and fallback components never
//! parse the output; it is opaque text handed to the upstream model.

use std::fmt::Write;

use pagesmith_document::{DocumentAccessor, NodeId};

/// Defensive caps; the described design embeds content verbatim, these
/// only guard against pathological documents.
const MAX_MARKUP_CHARS: usize = 60_000;
const MAX_STYLESHEET_CHARS: usize = 20_000;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_markup_chars: usize,
    max_stylesheet_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            max_markup_chars: MAX_MARKUP_CHARS,
            max_stylesheet_chars: MAX_STYLESHEET_CHARS,
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the prompt from current document state, selection, and the
    /// user instruction (or the autonomous-improvement directive when the
    /// instruction is absent).
    pub fn build<A: DocumentAccessor>(
        &self,
        doc: &A,
        selection: Option<NodeId>,
        instruction: Option<&str>,
        device_context: &str,
    ) -> String {
        let markup = bounded(&doc.markup(), self.max_markup_chars, "markup");
        let stylesheet = bounded(&doc.stylesheet(), self.max_stylesheet_chars, "stylesheet");

        let mut prompt = String::new();
        prompt.push_str(
            "You are the editing assistant inside a visual website builder. \
             You modify the page the user is editing.\n\n",
        );

        let _ = writeln!(prompt, "## Current page markup\n{}\n", markup);
        let _ = writeln!(prompt, "## Current stylesheet\n{}\n", stylesheet);

        if !device_context.is_empty() {
            let _ = writeln!(prompt, "## Device context\n{}\n", device_context);
        }

        if let Some(node) = selection {
            let description = describe_selection(doc, node);
            let _ = writeln!(
                prompt,
                "## Selection constraint\n\
                 The user has selected {}. Operate ONLY on the selected element. \
                 Retrieve it with the current-selection target; do not search \
                 the page for it.\n",
                description
            );
        }

        match instruction {
            Some(text) => {
                let _ = writeln!(prompt, "## Instruction\n{}\n", text);
            }
            None => {
                prompt.push_str(
                    "## Instruction\n\
                     Review the page and suggest exactly one concrete improvement, \
                     then apply it. Pick the single change with the most visual \
                     impact.\n\n",
                );
            }
        }

        prompt.push_str(
            "## Response format\n\
             Reply with JSON. Either return the complete updated document as \
             `newMarkup` (and `newStylesheet` when styles change), which is preferred, \
             or a list of `operations`, each `{\"op\": ..., \"target\": \
             {\"by\": ..., \"value\": ...}}`. Always include a short, \
             non-technical one-sentence `explanation` of what you changed.\n",
        );

        prompt
    }
}

fn describe_selection<A: DocumentAccessor>(doc: &A, node: NodeId) -> String {
    match doc.element_id(node) {
        Some(id) => format!("the element with id \"{}\"", id),
        None => match doc.content(node) {
            Some(text) if !text.trim().is_empty() => {
                let text = text.trim();
                let snippet: String = text.chars().take(40).collect();
                format!("an element containing \"{}\"", snippet)
            }
            _ => "an element on the page".to_string(),
        },
    }
}

fn bounded(text: &str, cap: usize, label: &str) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    tracing::debug!(label, cap, "prompt section truncated");
    text.chars().take(cap).collect()
}
