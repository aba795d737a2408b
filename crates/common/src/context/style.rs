//! Style Calibrator - lightweight post-hoc adjustments to a composed answer
//!
//! Non-LLM string transforms only: whitespace normalization, first-person
//! framing, and register trimming driven by the persona's style descriptor.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Profile describing a user's linguistic/stylistic traits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Persona {
    /// Free-text style descriptor extracted from the user's data
    /// (e.g., "concise and direct", "warm, rambling")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_style: Option<String>,
}

/// Prepended when the answer lacks any first-person framing
const FIRST_PERSON_LEAD: &str = "Speaking for myself, ";

/// Words that indicate the answer is already in first person
const FIRST_PERSON_WORDS: &[&str] = &[
    "i", "i'm", "i've", "i'll", "i'd", "my", "me", "mine", "myself",
];

/// Leading discourse connectives stripped for concise/direct personas
const DISCOURSE_CONNECTIVES: &[&str] = &[
    "therefore",
    "in summary",
    "overall",
    "as can be seen",
    "总的来说",
    "综上所述",
    "因此",
];

/// Style descriptors that select the connective-stripping pass
const CONCISE_MARKERS: &[&str] = &["concise", "direct", "简洁", "直接"];

fn trailing_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("static regex"))
}

fn newline_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Apply persona-aware post-processing to a composed answer.
///
/// Pure string transform; deterministic; no I/O. Empty input is a no-op.
pub fn calibrate_style(answer: &str, persona: Option<&Persona>) -> String {
    if answer.trim().is_empty() {
        return answer.to_string();
    }

    // Whitespace normalization: no trailing spaces before newlines, at most
    // one blank line in a row
    let mut text = trailing_space_re().replace_all(answer, "\n").into_owned();
    text = newline_run_re().replace_all(&text, "\n\n").into_owned();
    let mut text = text.trim().to_string();

    if is_concise_register(persona) {
        text = strip_leading_connective(&text);
    }

    if text.chars().count() > 6 && !has_first_person_marker(&text) {
        let mut framed = String::with_capacity(FIRST_PERSON_LEAD.len() + text.len());
        framed.push_str(FIRST_PERSON_LEAD);
        framed.push_str(&lowercase_first(&text));
        text = framed;
    }

    text
}

fn has_first_person_marker(text: &str) -> bool {
    if text.contains('我') {
        return true;
    }
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
        .any(|word| FIRST_PERSON_WORDS.contains(&word))
}

fn is_concise_register(persona: Option<&Persona>) -> bool {
    persona
        .and_then(|p| p.language_style.as_ref())
        .map(|style| {
            let lower = style.to_lowercase();
            CONCISE_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .unwrap_or(false)
}

/// Strip one leading discourse connective plus its trailing punctuation
fn strip_leading_connective(text: &str) -> String {
    let lower = text.to_lowercase();
    for connective in DISCOURSE_CONNECTIVES {
        if lower.starts_with(connective) {
            let rest = &text[connective.len()..];
            let rest = rest.trim_start_matches([',', '，', ':', '：', ' ']);
            if !rest.is_empty() {
                return uppercase_first(rest);
            }
        }
    }
    text.to_string()
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn uppercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
