use regex::Regex;
use std::sync::OnceLock;

use crate::slots::{split_macro_name, NONE_SENTINEL};

/// Marker left behind where a slot macro was stripped.
pub const EMPTY_PLACEHOLDER: &str = "{{}}";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder regex"))
}

fn none_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bNone\b").expect("none-word regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

fn is_macro_prefix(prefix: &str) -> bool {
    prefix == "char"
        || prefix == "user"
        || prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_value_boundary(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '.' | ',' | '"' | '\'' | '(' | ')' | '[' | ']'),
    }
}

/// Replaces `{{prefix_slot}}` macros for known slots with [`EMPTY_PLACEHOLDER`].
pub fn strip_slot_macros<S: AsRef<str>>(text: &str, slots: &[S]) -> String {
    placeholder_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            match split_macro_name(body, slots) {
                Some((prefix, _)) if is_macro_prefix(prefix) => EMPTY_PLACEHOLDER.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Removes every case-insensitive occurrence of `value` that sits between
/// word boundaries (text edge, whitespace or `. , " ' ( ) [ ]`).
pub fn strip_value(text: &str, value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return text.to_string();
    }
    let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(value))) else {
        return text.to_string();
    };

    let mut out = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut search_from = 0;
    while search_from <= text.len() {
        let Some(m) = re.find_at(text, search_from) else {
            break;
        };
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if is_value_boundary(before) && is_value_boundary(after) {
            out.push_str(&text[copied_to..m.start()]);
            copied_to = m.end();
            search_from = m.end();
        } else {
            let step = text[m.start()..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
            search_from = m.start() + step;
        }
    }
    out.push_str(&text[copied_to..]);
    out
}

pub fn collapse_whitespace(text: &str) -> String {
    whitespace_re().replace_all(text, " ").trim().to_string()
}

/// Canonical form of a message used to derive an instance id.
///
/// Slot macros, the literal word `None`, and every known outfit value are
/// removed so that changing clothes does not change the derived id.
pub fn normalize_for_identity<S: AsRef<str>, V: AsRef<str>>(
    raw: &str,
    slots: &[S],
    known_values: &[V],
) -> String {
    let mut text = strip_slot_macros(raw, slots);
    text = none_word_re().replace_all(&text, "").into_owned();

    let mut values: Vec<&str> = known_values
        .iter()
        .map(|v| v.as_ref().trim())
        .filter(|v| !v.is_empty() && *v != NONE_SENTINEL)
        .collect();
    values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    values.dedup();
    for value in values {
        text = strip_value(&text, value);
    }

    collapse_whitespace(&text)
}
