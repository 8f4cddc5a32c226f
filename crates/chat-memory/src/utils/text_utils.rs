//! Text shaping helpers shared by titles, snippets and summaries

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

const ELLIPSIS: char = '…';

pub struct TextUtils;

impl TextUtils {
    /// Collapse whitespace runs into single spaces and trim the ends
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        let trimmed = text.trim();
        let irregular = trimmed.contains("  ")
            || trimmed.contains(|c: char| c.is_whitespace() && c != ' ');
        if trimmed.len() == text.len() && !irregular {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(WHITESPACE_REGEX.replace_all(trimmed, " ").into_owned())
        }
    }

    /// First `n` whitespace-separated words, joined by single spaces
    pub fn first_words(text: &str, n: usize) -> String {
        text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
    }

    /// Bound `text` to `max_chars` characters. A cut string ends with an
    /// ellipsis and still fits within the bound.
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        if max_chars == 0 {
            return Cow::Borrowed("");
        }

        let keep: String = text.chars().take(max_chars - 1).collect();
        let mut result = keep.trim_end().to_string();
        result.push(ELLIPSIS);
        Cow::Owned(result)
    }
}
