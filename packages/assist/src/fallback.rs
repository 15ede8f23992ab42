//! Fallback Textual Mutator: last-resort substitution on serialized markup.
//!
//! Invoked only after the imperative path proved ineffective, and only
//! when the model's explanation carries change-indicating vocabulary. It
//! never touches the structured capability surface; it extracts an
//! intended substitution from the explanation, performs it on serialized
//! text, and re-parses the result back into the document. Structural
//! nuance is lost on this path, which is why it is a fallback.

use regex::{Regex, RegexBuilder};

use pagesmith_common::text::escape_text;
use pagesmith_document::DocumentAccessor;

use crate::errors::AssistError;

/// Explanation vocabulary that justifies attempting a fallback at all.
const CHANGE_VOCABULARY: &[&str] = &[
    "change", "update", "modify", "set ", "replace", "title", "headline", "text", "color",
    "heading", "button",
];

/// Placeholder phrases the builder seeds into templates; the last-resort
/// substitution strategy targets these.
const PLACEHOLDER_PHRASES: &[&str] = &[
    "Your Company Name",
    "Your headline here",
    "Enter your text here",
    "Lorem ipsum dolor sit amet",
];

/// Typed result of pattern extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub old_text: Option<String>,
    pub new_text: String,
}

enum PatternShape {
    NewOnly,
    OldAndNew,
}

pub struct FallbackMutator {
    patterns: Vec<(PatternShape, Regex)>,
}

impl Default for FallbackMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackMutator {
    pub fn new() -> Self {
        // Ordered, first match wins. Quoted substrings are required to
        // avoid false positives on prose.
        let sources = [
            (PatternShape::NewOnly, r#"(?i)changed\b[^'"]*?to\s+['"]([^'"]+)['"]"#),
            (PatternShape::NewOnly, r#"(?i)change\b[^'"]*?to\s+['"]([^'"]+)['"]"#),
            (
                PatternShape::OldAndNew,
                r#"(?i)from\s+['"]([^'"]+)['"]\s+to\s+['"]([^'"]+)['"]"#,
            ),
            (PatternShape::NewOnly, r#"(?i)\bto\s+['"]([^'"]+)['"]"#),
        ];
        let patterns = sources
            .into_iter()
            .map(|(shape, source)| {
                let regex = Regex::new(source).expect("hard-coded pattern compiles");
                (shape, regex)
            })
            .collect();
        Self { patterns }
    }

    /// Whether the explanation justifies a fallback attempt at all.
    pub fn is_applicable(explanation: &str) -> bool {
        let lowered = explanation.to_lowercase();
        CHANGE_VOCABULARY.iter().any(|word| lowered.contains(word))
    }

    /// Recover the intended substitution from the explanation.
    pub fn extract(&self, explanation: &str) -> Option<Extraction> {
        for (shape, regex) in &self.patterns {
            if let Some(captures) = regex.captures(explanation) {
                return match shape {
                    PatternShape::NewOnly => Some(Extraction {
                        old_text: None,
                        new_text: captures.get(1)?.as_str().to_string(),
                    }),
                    PatternShape::OldAndNew => Some(Extraction {
                        old_text: Some(captures.get(1)?.as_str().to_string()),
                        new_text: captures.get(2)?.as_str().to_string(),
                    }),
                };
            }
        }
        None
    }

    /// Attempt the substitution. `Ok(())` means the document changed;
    /// every dead end is `FallbackExhausted`.
    pub fn try_fallback<A: DocumentAccessor>(
        &self,
        doc: &mut A,
        explanation: &str,
        anchor: Option<&str>,
    ) -> Result<(), AssistError> {
        let exhausted = || AssistError::FallbackExhausted {
            explanation: explanation.to_string(),
        };

        let Some(extraction) = self.extract(explanation) else {
            tracing::debug!("no extraction pattern matched explanation");
            return Err(exhausted());
        };

        let markup = doc.markup();
        let rewritten = self
            .substitute(&markup, &extraction, anchor)
            .filter(|candidate| *candidate != markup)
            .ok_or_else(exhausted)?;

        doc.set_markup(&rewritten).map_err(|err| {
            tracing::warn!("fallback substitution broke well-formedness: {err}");
            exhausted()
        })?;
        tracing::info!("textual fallback applied");
        Ok(())
    }

    /// Strategy ladder, first change wins.
    fn substitute(
        &self,
        markup: &str,
        extraction: &Extraction,
        anchor: Option<&str>,
    ) -> Option<String> {
        if let Some(anchor) = anchor {
            if let Some(result) = replace_anchor_content(markup, anchor, &extraction.new_text) {
                return Some(result);
            }
        }

        if let Some(old_text) = &extraction.old_text {
            if let Some(result) = replace_all_ci(markup, old_text, &extraction.new_text) {
                return Some(result);
            }
        }

        for phrase in PLACEHOLDER_PHRASES {
            if let Some(result) = replace_all_ci(markup, phrase, &extraction.new_text) {
                return Some(result);
            }
        }

        None
    }
}

/// Derive the anchor slot identifier for the explanation's semantic
/// target, using the document's stable `slot-*` id convention: a slot
/// whose suffix appears in the explanation is the anchor.
pub fn detect_anchor(markup: &str, explanation: &str) -> Option<String> {
    let slot_ids = Regex::new(r#"id="(slot-[A-Za-z0-9_-]+)""#).expect("hard-coded pattern compiles");
    let lowered = explanation.to_lowercase();
    for captures in slot_ids.captures_iter(markup) {
        let slot = captures.get(1)?.as_str();
        let suffix = slot.trim_start_matches("slot-").replace('-', " ");
        if !suffix.is_empty() && lowered.contains(&suffix.to_lowercase()) {
            return Some(slot.to_string());
        }
    }
    None
}

/// Replace the content of the innermost open/close tag pair carrying
/// `id="<anchor>"`, stripping any nested markup from it.
fn replace_anchor_content(markup: &str, anchor: &str, new_text: &str) -> Option<String> {
    let needle = format!(r#"id="{}""#, anchor);
    let attr_pos = markup.find(&needle)?;

    // Back up to the start of the open tag, then find its end.
    let open_start = markup[..attr_pos].rfind('<')?;
    let tag: String = markup[open_start + 1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if tag.is_empty() {
        return None;
    }
    let open_end = open_start + markup[open_start..].find('>')? + 1;

    // Scan forward for the matching close, tracking same-tag nesting.
    let open_marker = format!("<{}", tag);
    let close_marker = format!("</{}>", tag);
    let mut depth = 1usize;
    let mut cursor = open_end;
    while depth > 0 {
        let rest = &markup[cursor..];
        let next_open = rest.find(&open_marker);
        let next_close = rest.find(&close_marker)?;
        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                cursor += open + open_marker.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    let close_start = cursor + next_close;
                    let mut result = String::with_capacity(markup.len());
                    result.push_str(&markup[..open_end]);
                    result.push_str(&escape_text(new_text));
                    result.push_str(&markup[close_start..]);
                    return Some(result);
                }
                cursor += next_close + close_marker.len();
            }
        }
    }
    None
}

/// Case-insensitive replace-all; `None` when the needle never occurs.
fn replace_all_ci(haystack: &str, needle: &str, replacement: &str) -> Option<String> {
    let pattern = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?;
    if !pattern.is_match(haystack) {
        return None;
    }
    let literal = escape_text(replacement);
    Some(
        pattern
            .replace_all(haystack, regex::NoExpand(&literal))
            .into_owned(),
    )
}
