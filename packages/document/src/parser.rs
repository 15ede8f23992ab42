//! Markup parser: flat text → node arena.
//!
//! Accepts the subset of HTML the builder emits: elements with quoted
//! attributes, text runs, void elements, and comments. Unclosed or
//! mismatched tags are a hard error; well-formedness is enforced at the
//! boundary, not repaired.

use pagesmith_common::text::unescape_entities;

use crate::ast::{ElementData, NodeId, NodeKind, NodeSlot};
use crate::document::EditableDocument;
use crate::errors::DocumentError;

/// Elements that never carry children and never emit a closing tag.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Parse markup into a fresh document with an empty stylesheet.
pub fn parse(markup: &str) -> Result<EditableDocument, DocumentError> {
    let (slots, roots) = Parser::new(markup).run()?;
    Ok(EditableDocument::from_arena(slots, roots))
}

pub(crate) struct Parser {
    chars: Vec<char>,
    pos: usize,
    slots: Vec<NodeSlot>,
    roots: Vec<NodeId>,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            slots: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn run(mut self) -> Result<(Vec<NodeSlot>, Vec<NodeId>), DocumentError> {
        while self.pos < self.chars.len() {
            if let Some(node) = self.parse_node(None)? {
                self.roots.push(node);
            }
        }
        Ok((self.slots, self.roots))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn advance(&mut self, count: usize) {
        self.pos += count;
    }

    fn skip_until(&mut self, marker: &str) -> Result<(), DocumentError> {
        while self.pos < self.chars.len() {
            if self.starts_with(marker) {
                self.advance(marker.chars().count());
                return Ok(());
            }
            self.advance(1);
        }
        Err(DocumentError::parse(
            self.pos,
            format!("expected '{}' before end of input", marker),
        ))
    }

    /// Parse one node. Returns `None` for skipped constructs (comments,
    /// declarations) and for a closing tag matching `open_tag` (which the
    /// caller consumes as its own terminator).
    fn parse_node(&mut self, open_tag: Option<&str>) -> Result<Option<NodeId>, DocumentError> {
        match self.peek() {
            None => Ok(None),
            Some('<') => {
                if self.starts_with("<!--") {
                    self.skip_until("-->")?;
                    return Ok(None);
                }
                if self.starts_with("<!") {
                    self.skip_until(">")?;
                    return Ok(None);
                }
                if self.starts_with("</") {
                    let start = self.pos;
                    self.advance(2);
                    let name = self.read_name();
                    self.skip_whitespace();
                    if self.peek() != Some('>') {
                        return Err(DocumentError::parse(self.pos, "malformed closing tag"));
                    }
                    self.advance(1);
                    return match open_tag {
                        Some(open) if open.eq_ignore_ascii_case(&name) => Ok(None),
                        Some(open) => Err(DocumentError::parse(
                            start,
                            format!("closing tag </{}> does not match open <{}>", name, open),
                        )),
                        None => Err(DocumentError::parse(
                            start,
                            format!("closing tag </{}> has no matching open tag", name),
                        )),
                    };
                }
                self.parse_element().map(Some)
            }
            Some(_) => self.parse_text().map(Some),
        }
    }

    fn parse_element(&mut self) -> Result<NodeId, DocumentError> {
        let start = self.pos;
        self.advance(1); // consume '<'
        let tag = self.read_name();
        if tag.is_empty() {
            return Err(DocumentError::parse(start, "expected tag name after '<'"));
        }

        let mut data = ElementData::new(tag.to_ascii_lowercase());
        self.parse_attributes(&mut data)?;

        let self_closing = if self.starts_with("/>") {
            self.advance(2);
            true
        } else if self.peek() == Some('>') {
            self.advance(1);
            false
        } else {
            return Err(DocumentError::parse(self.pos, "unterminated tag"));
        };

        let tag_name = data.tag.clone();
        let id = self.push_node(NodeKind::Element(data));

        let is_void = VOID_ELEMENTS.contains(&tag_name.as_str());
        if self_closing || is_void {
            return Ok(id);
        }

        // Children until the matching close tag.
        loop {
            if self.pos >= self.chars.len() {
                return Err(DocumentError::parse(
                    start,
                    format!("<{}> is never closed", tag_name),
                ));
            }
            let before = self.pos;
            match self.parse_node(Some(&tag_name))? {
                Some(child) => {
                    self.slots[child.0].parent = Some(id);
                    self.slots[id.0].children.push(child);
                }
                None => {
                    // Either a skipped construct or our closing tag; the
                    // closing tag moved the cursor past "</tag>".
                    if self.pos > before && self.closed_at(before) {
                        return Ok(id);
                    }
                }
            }
        }
    }

    /// Whether the construct consumed starting at `pos` was a closing tag.
    fn closed_at(&self, pos: usize) -> bool {
        self.chars.get(pos) == Some(&'<') && self.chars.get(pos + 1) == Some(&'/')
    }

    fn parse_attributes(&mut self, data: &mut ElementData) -> Result<(), DocumentError> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('>') | None => return Ok(()),
                Some('/') if self.starts_with("/>") => return Ok(()),
                _ => {}
            }

            let name = self.read_name();
            if name.is_empty() {
                return Err(DocumentError::parse(self.pos, "malformed attribute"));
            }
            self.skip_whitespace();

            let value = if self.peek() == Some('=') {
                self.advance(1);
                self.skip_whitespace();
                self.read_attribute_value()?
            } else {
                String::new()
            };

            match name.as_str() {
                "class" => {
                    data.classes = value.split_whitespace().map(str::to_string).collect();
                }
                "style" => {
                    data.styles = parse_style_attribute(&value);
                }
                _ => data.set_attribute(&name, &value),
            }
        }
    }

    fn read_attribute_value(&mut self) -> Result<String, DocumentError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.advance(1);
                let mut value = String::new();
                loop {
                    match self.peek() {
                        Some(c) if c == quote => {
                            self.advance(1);
                            return Ok(unescape_entities(&value));
                        }
                        Some(c) => {
                            value.push(c);
                            self.advance(1);
                        }
                        None => {
                            return Err(DocumentError::parse(
                                self.pos,
                                "unterminated attribute value",
                            ))
                        }
                    }
                }
            }
            _ => {
                // Unquoted value: run until whitespace or tag end.
                let mut value = String::new();
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || c == '>' || c == '/' {
                        break;
                    }
                    value.push(c);
                    self.advance(1);
                }
                Ok(unescape_entities(&value))
            }
        }
    }

    fn parse_text(&mut self) -> Result<NodeId, DocumentError> {
        let mut content = String::new();
        while let Some(c) = self.peek() {
            if c == '<' {
                break;
            }
            content.push(c);
            self.advance(1);
        }
        Ok(self.push_node(NodeKind::Text {
            content: unescape_entities(&content),
        }))
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':' {
                name.push(c);
                self.advance(1);
            } else {
                break;
            }
        }
        name
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance(1);
        }
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(NodeSlot::new(kind, None));
        id
    }
}

/// Split a `style` attribute value into (property, value) pairs.
pub(crate) fn parse_style_attribute(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|decl| {
            let (prop, val) = decl.split_once(':')?;
            let prop = prop.trim();
            let val = val.trim();
            if prop.is_empty() {
                None
            } else {
                Some((prop.to_string(), val.to_string()))
            }
        })
        .collect()
}
