//! RediSearch query construction.

use super::types::SearchFilters;

/// Characters RediSearch treats as separators inside a TAG value.
const TAG_SPECIAL: &[char] = &[
    ',', '.', '<', '>', '{', '}', '[', ']', '"', '\'', ':', ';', '!', '@', '#', '$', '%', '^', '&',
    '*', '(', ')', '-', '+', '=', '~', '|', '/', '\\', ' ',
];

/// Backslash-escapes a TAG value.
pub fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if TAG_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A single value as stored in a TAG field: unescaped, with commas turned
/// into spaces so the value is not split.
pub fn tag_value(value: &str) -> String {
    value.replace(',', " ").trim().to_string()
}

/// Joins keywords into the comma separated form stored in a TAG field.
pub fn join_tags(values: &[String]) -> String {
    values
        .iter()
        .map(|v| tag_value(v))
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a stored TAG field back into its values.
pub fn split_tags(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn format_bound(value: Option<f64>, unbounded: &str) -> String {
    match value {
        Some(v) => v.to_string(),
        None => unbounded.to_string(),
    }
}

/// Builds the filter part of a KNN query. No filters yields `*`.
pub fn build_filter(filters: &SearchFilters) -> String {
    let mut parts = Vec::new();
    if let Some(category) = filters.category.as_deref().filter(|c| !c.is_empty()) {
        parts.push(format!("@category:{{{}}}", escape_tag(&tag_value(category))));
    }
    if let Some(brand) = filters.brand.as_deref().filter(|b| !b.is_empty()) {
        parts.push(format!("@brand:{{{}}}", escape_tag(&tag_value(brand))));
    }
    let keywords: Vec<String> = filters
        .must_keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| escape_tag(&tag_value(k)))
        .collect();
    if !keywords.is_empty() {
        parts.push(format!("@keywords:{{{}}}", keywords.join("|")));
    }
    if filters.has_price_range() {
        parts.push(format!(
            "@price:[{} {}]",
            format_bound(filters.min_price, "-inf"),
            format_bound(filters.max_price, "+inf")
        ));
    }
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(" ")
    }
}

/// Wraps a filter into the hybrid KNN clause scored as `score`.
pub fn knn_query(filter: &str, k: usize) -> String {
    format!("({})=>[KNN {} @embedding $vec AS score]", filter, k)
}

/// Exact phrase query on the title text field.
pub fn title_phrase_query(title: &str) -> String {
    format!("@title:\"{}\"", title.replace('"', "\\\""))
}
