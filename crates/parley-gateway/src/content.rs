//! Message bodies are stored HTML-escaped and handed back unescaped.

use std::borrow::Cow;

pub const MAX_CONTENT_CHARS: usize = 5000;
pub const PREVIEW_CHARS: usize = 80;

pub fn sanitize(raw: &str) -> String {
    html_escape::encode_safe(raw).into_owned()
}

pub fn unsanitize(stored: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(stored)
}

/// First `PREVIEW_CHARS` characters of an unescaped body.
pub fn preview(stored: &str) -> String {
    unsanitize(stored).chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tags_round_trip() {
        let raw = r#"<script>alert("x & 'y'")</script>"#;
        let stored = sanitize(raw);
        assert!(!stored.contains('<'));
        assert!(!stored.contains('"'));
        assert_eq!(unsanitize(&stored), raw);
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let raw = "é".repeat(PREVIEW_CHARS + 10);
        assert_eq!(preview(&sanitize(&raw)).chars().count(), PREVIEW_CHARS);
        assert_eq!(preview("a &amp; b"), "a & b");
    }
}
