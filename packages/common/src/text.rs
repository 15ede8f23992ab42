//! Markup text escaping shared across packages.
//!
//! The serializer and the textual fallback both splice user-visible text
//! into markup; they must agree on the entity set or round-trips drift.

/// Escape text-node content.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape an attribute value (text escaping plus quotes).
pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Reverse entity escaping for the small entity set the builder emits.
/// Unknown entities pass through literally.
pub fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let mut replaced = false;
        for (entity, ch) in [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&#39;", '\''),
            ("&apos;", '\''),
        ] {
            if rest.starts_with(entity) {
                out.push(ch);
                rest = &rest[entity.len()..];
                replaced = true;
                break;
            }
        }
        if !replaced {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        let original = r#"Tom & Jerry say "hi" <3"#;
        assert_eq!(unescape_entities(&escape_attr(original)), original);
    }

    #[test]
    fn test_unknown_entity_passes_through() {
        assert_eq!(unescape_entities("a &copy; b"), "a &copy; b");
        assert_eq!(unescape_entities("lone & ampersand"), "lone & ampersand");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(escape_text("hello"), "hello");
        assert_eq!(unescape_entities("hello"), "hello");
    }
}
