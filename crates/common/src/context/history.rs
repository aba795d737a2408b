//! History Compressor - bounds a long conversation to a short text blob
//!
//! Recent turns are kept verbatim; older turns are reduced to a heuristic
//! digest (turn counts and recurring keywords, no NLG). The result is
//! hard-truncated to the character budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Speaker role within a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Persona-voice speaker label: the assistant speaks as the user's
    /// digital self
    fn label(&self) -> &'static str {
        match self {
            Role::Assistant => "Me",
            Role::User => "You",
        }
    }
}

/// One turn of an ordered, append-only conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// History compression options; out-of-range values are clamped
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// Turns kept verbatim at the tail, clamped to [0, 10]
    pub keep_last: usize,

    /// Hard output budget in characters, clamped to [200, 4000]
    pub max_chars: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            keep_last: 4,
            max_chars: 1200,
        }
    }
}

const KEEP_LAST_RANGE: (usize, usize) = (0, 10);
const MAX_CHARS_RANGE: (usize, usize) = (200, 4000);

const HIGHLIGHTS_HEADING: &str = "【Conversation History Highlights】";
const RECENT_HEADING: &str = "【Recent Conversation】";

/// Compress a conversation history into a bounded-length text blob.
///
/// The input sequence is consumed read-only; it is partitioned into
/// `earlier` (digested) and `recent` (verbatim tail). The final truncation
/// is a hard cut and may sever a line mid-word; that is an accepted lossy
/// bound.
pub fn compress_history(history: &[ConversationTurn], options: &HistoryOptions) -> String {
    let keep_last = options.keep_last.clamp(KEEP_LAST_RANGE.0, KEEP_LAST_RANGE.1);
    let max_chars = options.max_chars.clamp(MAX_CHARS_RANGE.0, MAX_CHARS_RANGE.1);

    let split_at = history.len().saturating_sub(keep_last);
    let (earlier, recent) = history.split_at(split_at);

    let mut output = String::new();

    // No empty heading when there is nothing to digest
    if !earlier.is_empty() {
        output.push_str(HIGHLIGHTS_HEADING);
        output.push('\n');
        output.push_str(&digest_turns(earlier));
        output.push_str("\n\n");
    }

    output.push_str(RECENT_HEADING);
    output.push('\n');
    let rendered: Vec<String> = recent
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
        .collect();
    output.push_str(&rendered.join("\n"));

    // Hard cut, not word-aware
    output.chars().take(max_chars).collect()
}

/// Turn-count/topic-level synopsis of earlier turns.
///
/// Not a summary in the NLG sense: counts the exchanges and surfaces the
/// most recurrent content words as topic hints.
fn digest_turns(earlier: &[ConversationTurn]) -> String {
    let user_turns = earlier.iter().filter(|t| t.role == Role::User).count();
    let assistant_turns = earlier.len() - user_turns;

    let mut digest = format!(
        "- {} earlier turns ({} from you, {} from me)",
        earlier.len(),
        user_turns,
        assistant_turns
    );

    let topics = top_keywords(earlier, 5);
    if !topics.is_empty() {
        digest.push_str(&format!("\n- Topics touched: {}", topics.join(", ")));
    }

    digest
}

/// Most frequent content words across turns, longest-first tie-break
fn top_keywords(turns: &[ConversationTurn], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for turn in turns {
        for token in turn
            .content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 3)
        {
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    // Deterministic order: frequency, then length, then lexical
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.0.len().cmp(&a.0.len()))
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _)| word)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
        }
    }

    fn five_turns() -> Vec<ConversationTurn> {
        vec![
            turn(Role::User, "tell me about your trip to kyoto"),
            turn(Role::Assistant, "the kyoto trip was in autumn, lots of temples"),
            turn(Role::User, "which temple did you like most"),
            turn(Role::Assistant, "kinkakuji, the golden pavilion"),
            turn(Role::User, "would you go back"),
        ]
    }

    #[test]
    fn test_scenario_headings_and_lines() {
        // 5 turns, keep 2: 3 earlier turns force the highlights section,
        // and the recent section renders exactly 2 lines.
        let output = compress_history(
            &five_turns(),
            &HistoryOptions {
                keep_last: 2,
                max_chars: 500,
            },
        );

        assert!(output.contains(HIGHLIGHTS_HEADING));
        assert!(output.contains(RECENT_HEADING));

        let recent_part = output.split(RECENT_HEADING).nth(1).unwrap();
        let lines: Vec<&str> = recent_part.trim().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Me: "));
        assert!(lines[1].starts_with("You: "));
    }

    #[test]
    fn test_no_earlier_turns_omits_highlights() {
        let history = vec![
            turn(Role::User, "hello"),
            turn(Role::Assistant, "hi there"),
        ];
        let output = compress_history(&history, &HistoryOptions::default());

        assert!(!output.contains(HIGHLIGHTS_HEADING));
        assert!(output.starts_with(RECENT_HEADING));
    }

    #[test]
    fn test_length_bound_holds() {
        let history: Vec<ConversationTurn> = (0..50)
            .map(|i| turn(Role::User, &format!("message number {} {}", i, "w".repeat(200))))
            .collect();

        for max_chars in [200, 500, 1200, 4000] {
            let output = compress_history(
                &history,
                &HistoryOptions {
                    keep_last: 4,
                    max_chars,
                },
            );
            assert!(output.chars().count() <= max_chars);
        }
    }

    #[test]
    fn test_options_clamped() {
        let history = five_turns();
        // keep_last above range clamps to 10, max_chars below range to 200
        let output = compress_history(
            &history,
            &HistoryOptions {
                keep_last: 99,
                max_chars: 10,
            },
        );
        assert!(output.chars().count() <= 200);
        // All 5 turns fit within keep_last=10, so no highlights section
        assert!(!output.contains(HIGHLIGHTS_HEADING));
    }

    #[test]
    fn test_keep_last_zero_digests_everything() {
        let output = compress_history(
            &five_turns(),
            &HistoryOptions {
                keep_last: 0,
                max_chars: 1000,
            },
        );
        assert!(output.contains(HIGHLIGHTS_HEADING));
        assert!(output.contains("5 earlier turns"));
        // Recent section is present but empty
        assert!(output.contains(RECENT_HEADING));
    }

    #[test]
    fn test_digest_surfaces_recurrent_topics() {
        let output = compress_history(
            &five_turns(),
            &HistoryOptions {
                keep_last: 1,
                max_chars: 2000,
            },
        );
        // "kyoto" appears twice in the earlier turns
        assert!(output.to_lowercase().contains("kyoto"));
    }

    #[test]
    fn test_input_not_consumed() {
        let history = five_turns();
        let before = history.clone();
        let _ = compress_history(&history, &HistoryOptions::default());
        assert_eq!(history, before);
    }
}
