//! Text normalization helpers used across stages.

use html_escape::decode_html_entities;
use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static MEASURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:[.,]\d+)?)\s*[xX]\s*(\d+(?:[.,]\d+)?)(?:\s*cm)?\s*$").unwrap()
});

const EDGE_PUNCT: &[char] = &[',', '.', ';', ':', '!', '?'];

/// Collapses every whitespace run to a single space and trims.
pub fn collapse_whitespace(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_string()
}

/// Unescapes entities, drops tags and normalizes whitespace.
pub fn strip_html(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let decoded = decode_html_entities(s);
    let untagged = TAG_RE.replace_all(&decoded, " ");
    collapse_whitespace(&untagged)
}

/// Normalizes one extracted keyword: single spaces, no edge punctuation, lowercase.
pub fn clean_token(s: &str) -> String {
    collapse_whitespace(s)
        .trim_matches(|c: char| c.is_whitespace() || EDGE_PUNCT.contains(&c))
        .to_lowercase()
}

/// Cleans every token, dropping ones shorter than two characters and duplicates.
pub fn clean_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let token = clean_token(item.as_ref());
        if token.chars().count() >= 2 && !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

/// Rewrites `10x15` style measures as `10 x 15 cm`; other text is returned as is.
pub fn shorten_measure(s: &str) -> String {
    match MEASURE_RE.captures(s.trim()) {
        Some(caps) => format!(
            "{} x {} cm",
            caps[1].replace(',', "."),
            caps[2].replace(',', ".")
        ),
        None => s.to_string(),
    }
}

/// Prepares text for the embedding service: no NULs, single spaces,
/// at most `max_chars` characters and never empty.
pub fn sanitize_for_embedding(text: &str, max_chars: usize) -> String {
    let cleaned = collapse_whitespace(&text.replace('\0', " "));
    let truncated: String = match cleaned.char_indices().nth(max_chars) {
        Some((idx, _)) => cleaned[..idx].to_string(),
        None => cleaned,
    };
    if truncated.is_empty() {
        ".".to_string()
    } else {
        truncated
    }
}

/// Parses catalog flag values such as `true`, `1`, `yes`, `n`.
pub fn to_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Joins the non-empty parts with `". "`.
pub fn join_non_empty<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(". ")
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>Calendario &amp; agenda</p>\n<br/>  2025"),
            "Calendario & agenda 2025"
        );
        assert_eq!(strip_html("&lt;b&gt;Bold&lt;/b&gt; text"), "Bold text");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn test_clean_list() {
        let cleaned = clean_list(["  Cat  Lover, ", "cat lover", "a", "Wall Calendar!", "..."]);
        assert_eq!(cleaned, vec!["cat lover", "wall calendar"]);
    }

    #[test]
    fn test_shorten_measure() {
        assert_eq!(shorten_measure("10x15"), "10 x 15 cm");
        assert_eq!(shorten_measure(" 29,7 X 42 cm "), "29.7 x 42 cm");
        assert_eq!(shorten_measure("A5"), "A5");
        assert_eq!(shorten_measure(""), "");
    }

    #[test]
    fn test_sanitize_for_embedding() {
        assert_eq!(sanitize_for_embedding("a\0b \n\t c", 100), "a b c");
        assert_eq!(sanitize_for_embedding("   ", 100), ".");
        assert_eq!(sanitize_for_embedding("àèìòù", 3), "àèì");
    }

    #[test]
    fn test_to_bool() {
        assert_eq!(to_bool(" Yes "), Some(true));
        assert_eq!(to_bool("0"), Some(false));
        assert_eq!(to_bool("maybe"), None);
    }

    #[test]
    fn test_join_non_empty() {
        assert_eq!(join_non_empty(["Mug", "", "Kitchen"]), "Mug. Kitchen");
        assert_eq!(join_non_empty(Vec::<&str>::new()), "");
    }
}
