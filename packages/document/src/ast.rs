use serde::{Deserialize, Serialize};

/// Stable handle to a node within one [`crate::EditableDocument`] arena.
///
/// Handles are invalidated by `set_markup` and `flush` (the arena is
/// rebuilt); callers re-resolve through `find_nodes` after either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Element payload: tag name plus the three addressable maps.
///
/// `class` and `style` are first-class fields rather than entries in
/// `attributes`; the serializer reassembles them into the conventional
/// attribute syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub classes: Vec<String>,
    pub styles: Vec<(String, String)>,
}

impl ElementData {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            classes: Vec::new(),
            styles: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.attributes.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.attributes.push((name.to_string(), value.to_string()));
        }
    }

    pub fn style(&self, property: &str) -> Option<&str> {
        self.styles
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_style(&mut self, property: &str, value: &str) {
        if let Some(entry) = self.styles.iter_mut().find(|(p, _)| p == property) {
            entry.1 = value.to_string();
        } else {
            self.styles.push((property.to_string(), value.to_string()));
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }
}

/// A node is either an element or a run of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Element(ElementData),
    Text { content: String },
}

impl NodeKind {
    pub fn as_element(&self) -> Option<&ElementData> {
        match self {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text { .. } => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match self {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text { .. } => None,
        }
    }
}

/// Arena slot. Removed subtrees stay in the arena marked dead so stale
/// handles fail softly instead of aliasing a new node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeSlot {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub alive: bool,
}

impl NodeSlot {
    pub fn new(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            alive: true,
        }
    }
}
