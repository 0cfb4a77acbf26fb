//! # Utilities Module
//!
//! ## Purpose
//! Text helpers shared by the search and suggestion engines: query
//! normalization, HTML escaping and match highlighting.
//!
//! ## Input/Output Specification
//! - **Input**: Raw query strings and stored field values
//! - **Output**: Normalized queries, escaped/highlighted renderings
//! - **Safety**: All highlighted output is escaped for HTML embedding

use regex::RegexBuilder;
use unicode_normalization::UnicodeNormalization;

/// Normalize a query for matching: NFC-normalize, collapse whitespace runs
/// and lowercase. Handles mixed Bangla/English input.
pub fn normalize_text(text: &str) -> String {
    text.nfc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Escape text for safe embedding in HTML output
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wrap every case-insensitive occurrence of `query` in `text` with
/// `<mark>` markers. Non-matching segments are HTML-escaped; an empty
/// query or text yields the escaped text unchanged.
pub fn highlight_match(text: &str, query: &str) -> String {
    if text.is_empty() || query.is_empty() {
        return escape_html(text);
    }

    let pattern = match RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
    {
        Ok(p) => p,
        Err(_) => return escape_html(text),
    };

    let mut highlighted = String::with_capacity(text.len() + 16);
    let mut last_end = 0;
    for m in pattern.find_iter(text) {
        highlighted.push_str(&escape_html(&text[last_end..m.start()]));
        highlighted.push_str("<mark>");
        highlighted.push_str(&escape_html(m.as_str()));
        highlighted.push_str("</mark>");
        last_end = m.end();
    }
    highlighted.push_str(&escape_html(&text[last_end..]));
    highlighted
}

/// True iff the query consists solely of ASCII digits (and is non-empty)
pub fn is_numeric_query(query: &str) -> bool {
    !query.is_empty() && query.chars().all(|c| c.is_ascii_digit())
}
