//! Text cleanup for titles and abstracts.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static RE_BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:jats:)?(?:p|br|sec|title|div|li|list|list-item|para)\b[^>]*>").unwrap()
});
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static RE_ABSTRACT_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)abstract\b[\s:.\-]*").unwrap());

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove JATS/HTML tags; block-level tags become a space.
pub fn strip_markup(text: &str) -> String {
    let spaced = RE_BLOCK_TAG.replace_all(text, " ");
    RE_TAG.replace_all(&spaced, "").into_owned()
}

/// Decode named and numeric character references. Unknown ones are kept verbatim.
pub fn decode_entities(text: &str) -> String {
    RE_ENTITY
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        _ => return None,
    })
}

/// Markup-free single-line text, or `None` when nothing is left.
pub fn clean_inline(text: &str) -> Option<String> {
    let cleaned = collapse_whitespace(&decode_entities(&strip_markup(text)));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Clean an abstract: strip markup, decode entities, drop a leading
/// "Abstract" heading and collapse whitespace.
pub fn clean_abstract(text: &str) -> Option<String> {
    let cleaned = clean_inline(text)?;
    let cleaned = RE_ABSTRACT_HEADING.replace(&cleaned, "");
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_strip_markup_keeps_inline_words_together() {
        let text = "<jats:p>Sea <jats:italic>level</jats:italic>s rise.</jats:p><jats:p>Next</jats:p>";
        assert_eq!(collapse_whitespace(&strip_markup(text)), "Sea levels rise. Next");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#233;t&#xE9;"), "\u{e9}t\u{e9}");
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
    }

    #[test]
    fn test_clean_abstract() {
        let raw = "<jats:title>Abstract</jats:title><jats:p>Coastal  cities &amp; adaptation.</jats:p>";
        assert_eq!(
            clean_abstract(raw).as_deref(),
            Some("Coastal cities & adaptation.")
        );
        assert_eq!(clean_abstract("Abstract: Short.").as_deref(), Some("Short."));
        assert_eq!(
            clean_abstract("Abstractions matter.").as_deref(),
            Some("Abstractions matter.")
        );
        assert_eq!(clean_abstract("<jats:p> </jats:p>"), None);
        assert_eq!(clean_abstract("Abstract"), None);
    }

    #[test]
    fn test_clean_inline() {
        assert_eq!(
            clean_inline("  Deep <i>sea</i>\n vents ").as_deref(),
            Some("Deep sea vents")
        );
        assert_eq!(clean_inline("<b></b>"), None);
    }
}
