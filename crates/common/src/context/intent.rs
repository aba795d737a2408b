//! Source Intent Detector - maps a free-text query to candidate data sources
//!
//! Provides:
//! - Keyword-heuristic source classification
//! - Confidence scoring
//!
//! The output is advisory only: downstream reranking uses it as a soft boost
//! signal, never as a hard filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Imported data origins a query can reference.
///
/// Closed enumeration: adding a source means extending this enum and the
/// rule table below, nothing else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// WeChat chat export
    Wechat,
    /// Gmail mailbox export
    Gmail,
    /// Instagram archive
    Instagram,
    /// Google browsing/search history
    Google,
    /// Twitter archive
    Twitter,
}

impl Source {
    /// Canonical lower-case tag for this source
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wechat => "wechat",
            Source::Gmail => "gmail",
            Source::Instagram => "instagram",
            Source::Google => "google",
            Source::Twitter => "twitter",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wechat" => Ok(Source::Wechat),
            "gmail" => Ok(Source::Gmail),
            "instagram" => Ok(Source::Instagram),
            "google" => Ok(Source::Google),
            "twitter" => Ok(Source::Twitter),
            _ => Err(()),
        }
    }
}

/// Output of keyword classification over a query string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceIntent {
    /// Candidate source tags, deterministic order
    pub sources: BTreeSet<Source>,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

/// Baseline confidence when no rule matched
const BASELINE_CONFIDENCE: f32 = 0.3;

/// Fixed ordered rule table: keywords -> source tag.
///
/// Keywords are matched case-insensitively as substrings; a query may fire
/// multiple rules. CJK keywords are included because the product's queries
/// are frequently Chinese.
const SOURCE_RULES: &[(Source, &[&str])] = &[
    (
        Source::Gmail,
        &["mail", "email", "gmail", "inbox", "邮件", "邮箱"],
    ),
    (
        Source::Wechat,
        &["wechat", "chat record", "聊天", "微信", "群聊", "朋友圈"],
    ),
    (
        Source::Instagram,
        &["instagram", "insta", "ig post", "照片墙"],
    ),
    (
        Source::Google,
        &["browsing", "search history", "google", "browse", "浏览", "搜索记录"],
    ),
    (
        Source::Twitter,
        &["twitter", "tweet", "推特", "推文"],
    ),
];

/// Classify a query into candidate data sources with a confidence score.
///
/// Pure function of the input string and the fixed rule table. Empty input
/// yields no sources at baseline confidence.
pub fn detect_source_intent(query: &str) -> SourceIntent {
    let query_lower = query.trim().to_lowercase();

    let mut sources = BTreeSet::new();
    if !query_lower.is_empty() {
        for (source, keywords) in SOURCE_RULES {
            if keywords.iter().any(|kw| query_lower.contains(kw)) {
                sources.insert(*source);
            }
        }
    }

    // 0.3 baseline; each matched tag adds 0.1 on top of 0.6, capped at 1.0
    let confidence = if sources.is_empty() {
        BASELINE_CONFIDENCE
    } else {
        (0.6 + 0.1 * sources.len() as f32).min(1.0)
    };

    SourceIntent {
        sources,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_baseline() {
        let intent = detect_source_intent("");
        assert!(intent.sources.is_empty());
        assert_eq!(intent.confidence, 0.3);
    }

    #[test]
    fn test_no_match_baseline() {
        let intent = detect_source_intent("what is the weather tomorrow");
        assert!(intent.sources.is_empty());
        assert_eq!(intent.confidence, 0.3);
    }

    #[test]
    fn test_wechat_chinese_query() {
        let intent = detect_source_intent("帮我查一下微信聊天记录");
        assert!(intent.sources.contains(&Source::Wechat));
        assert!(intent.confidence >= 0.6);
    }

    #[test]
    fn test_multiple_sources() {
        let intent = detect_source_intent("search my gmail inbox and wechat chats");
        assert!(intent.sources.contains(&Source::Gmail));
        assert!(intent.sources.contains(&Source::Wechat));
        assert_eq!(intent.confidence, 0.8);
    }

    #[test]
    fn test_confidence_monotonic_in_tag_count() {
        let one = detect_source_intent("show my tweets");
        let two = detect_source_intent("show my tweets and instagram posts");
        assert!(one.sources.len() < two.sources.len());
        assert!(one.confidence <= two.confidence);
    }

    #[test]
    fn test_confidence_capped() {
        let intent =
            detect_source_intent("gmail wechat instagram google history twitter everything");
        assert_eq!(intent.sources.len(), 5);
        assert!(intent.confidence <= 1.0);
    }

    #[test]
    fn test_source_round_trip() {
        for source in [
            Source::Wechat,
            Source::Gmail,
            Source::Instagram,
            Source::Google,
            Source::Twitter,
        ] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert!("myspace".parse::<Source>().is_err());
    }
}
