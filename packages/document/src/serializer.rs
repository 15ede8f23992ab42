//! Serializer: node arena → flat markup.
//!
//! Emits attributes in insertion order and escapes text and attribute
//! values, so serialize ∘ parse is stable. Every opened element is closed
//! (void elements excepted), which keeps the well-formedness invariant the
//! rest of the pipeline relies on.

use std::fmt::Write;

use pagesmith_common::text::{escape_attr, escape_text};

use crate::ast::{NodeId, NodeKind};
use crate::document::EditableDocument;
use crate::parser::VOID_ELEMENTS;

pub(crate) fn serialize_markup(doc: &EditableDocument) -> String {
    let mut out = String::new();
    for root in doc.root_ids() {
        serialize_node(doc, root, &mut out);
    }
    out
}

fn serialize_node(doc: &EditableDocument, id: NodeId, out: &mut String) {
    let Some(kind) = doc.kind(id) else {
        return;
    };
    match kind {
        NodeKind::Text { content } => out.push_str(&escape_text(content)),
        NodeKind::Element(data) => {
            let _ = write!(out, "<{}", data.tag);
            if !data.classes.is_empty() {
                let _ = write!(out, r#" class="{}""#, escape_attr(&data.classes.join(" ")));
            }
            if !data.styles.is_empty() {
                let css = data
                    .styles
                    .iter()
                    .map(|(p, v)| format!("{}: {}", p, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                let _ = write!(out, r#" style="{}""#, escape_attr(&css));
            }
            for (name, value) in &data.attributes {
                if value.is_empty() {
                    let _ = write!(out, " {}", name);
                } else {
                    let _ = write!(out, r#" {}="{}""#, name, escape_attr(value));
                }
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&data.tag.as_str()) {
                return;
            }
            for child in doc.child_ids(id) {
                serialize_node(doc, child, out);
            }
            let _ = write!(out, "</{}>", data.tag);
        }
    }
}
