//! The capability surface the assist pipeline consumes.
//!
//! The executor never touches arena internals; it sees this trait, which
//! makes the instrumentation decorator in the assist package a drop-in
//! wrapper around the real document.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::NodeId;
use crate::errors::DocumentError;

/// Closed node-lookup grammar.
///
/// Rendered descriptions feed user-facing diagnostics, so they read as
/// plain language rather than selector syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "by", content = "value")]
pub enum Criterion {
    Id(String),
    Tag(String),
    ClassName(String),
    Selection,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Id(id) => write!(f, "the element with id \"{}\"", id),
            Criterion::Tag(tag) => write!(f, "<{}> elements", tag),
            Criterion::ClassName(class) => write!(f, "elements with class \"{}\"", class),
            Criterion::Selection => write!(f, "the selected element"),
        }
    }
}

/// Get/set capability surface over an editable document tree.
pub trait DocumentAccessor {
    /// Serialize the current tree to flat markup.
    fn markup(&self) -> String;

    /// Current stylesheet text.
    fn stylesheet(&self) -> String;

    /// Replace the whole tree by re-parsing `markup`. Selection survives
    /// when the previously selected element's id still resolves.
    fn set_markup(&mut self, markup: &str) -> Result<(), DocumentError>;

    fn set_stylesheet(&mut self, css: &str);

    fn selected_node(&self) -> Option<NodeId>;

    fn find_nodes(&self, criterion: &Criterion) -> Vec<NodeId>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str)
        -> Result<(), DocumentError>;

    /// Concatenated text content of the node's subtree.
    fn content(&self, node: NodeId) -> Option<String>;

    /// Replace an element's children with a single text node, or rewrite a
    /// text node's content.
    fn set_content(&mut self, node: NodeId, text: &str) -> Result<(), DocumentError>;

    fn style(&self, node: NodeId, property: &str) -> Option<String>;
    fn set_style(&mut self, node: NodeId, property: &str, value: &str)
        -> Result<(), DocumentError>;

    /// The element's `id` attribute, if any.
    fn element_id(&self, node: NodeId) -> Option<String>;

    fn classes(&self, node: NodeId) -> Vec<String>;
    fn add_class(&mut self, node: NodeId, class: &str) -> Result<(), DocumentError>;
    fn remove_class(&mut self, node: NodeId, class: &str) -> Result<(), DocumentError>;

    /// Detach the node and its subtree.
    fn remove(&mut self, node: NodeId) -> Result<(), DocumentError>;

    /// Number of live nodes (elements and text runs).
    fn node_count(&self) -> usize;

    /// One serialize → re-parse normalization cycle.
    fn flush(&mut self) -> Result<(), DocumentError>;

    /// Set while AI-authored content is applied but not yet persisted.
    fn mark_pending_assist(&mut self);
    fn clear_pending_assist(&mut self);
    fn has_pending_assist(&self) -> bool;
}
