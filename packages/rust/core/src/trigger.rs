//! Decides whether a query warrants a supplementary live lookup.

use kbchat_shared::{KbChatError, LiveAugmentationConfig, Result};
use regex::{Regex, RegexBuilder};

/// Compiled live-augmentation trigger.
///
/// Keywords match case-insensitively on word boundaries, with an optional
/// plural `s`, so "trend" fires on "recent trends" and "now" fires on "what
/// is happening now" but not on "knowledge". Multi-word keywords such as
/// "state of" match as a phrase with flexible whitespace.
#[derive(Debug, Clone)]
pub struct LiveTrigger {
    keywords: Option<Regex>,
    year: Option<Regex>,
    enabled: bool,
}

impl LiveTrigger {
    pub fn from_config(config: &LiveAugmentationConfig) -> Result<Self> {
        let alternatives: Vec<String> = config
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                k.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();

        let keywords = if alternatives.is_empty() {
            None
        } else {
            let pattern = format!(r"\b(?:{})s?\b", alternatives.join("|"));
            Some(
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| KbChatError::config(format!("invalid live keyword: {e}")))?,
            )
        };

        let year = if config.match_years {
            Some(
                Regex::new(r"\b(?:1[89]|2\d)\d{2}\b")
                    .map_err(|e| KbChatError::config(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(Self {
            keywords,
            year,
            enabled: config.enabled,
        })
    }

    /// Whether `query` should trigger a live lookup.
    pub fn should_trigger(&self, query: &str) -> bool {
        self.enabled && (matches(&self.keywords, query) || matches(&self.year, query))
    }
}

fn matches(re: &Option<Regex>, query: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> LiveTrigger {
        LiveTrigger::from_config(&LiveAugmentationConfig::default()).unwrap()
    }

    #[test]
    fn fires_on_recency_and_depth_keywords() {
        let t = trigger();
        assert!(t.should_trigger("What are the LATEST developments in RAG?"));
        assert!(t.should_trigger("give me a comprehensive overview of containers"));
        assert!(t.should_trigger("tell me more"));
        assert!(t.should_trigger("recent trends in fintech"));
        assert!(t.should_trigger("what's the state   of quantum computing"));
    }

    #[test]
    fn fires_on_four_digit_years() {
        let t = trigger();
        assert!(t.should_trigger("AI regulation in 2024"));
        assert!(t.should_trigger("events of 1999"));
        assert!(!t.should_trigger("explain error 4040 in docker"));
        assert!(!t.should_trigger("port 80808 is invalid"));
    }

    #[test]
    fn ignores_keywords_inside_other_words() {
        let t = trigger();
        assert!(!t.should_trigger("What is knowledge graph retrieval?"));
        assert!(!t.should_trigger("Explain vector databases"));
        assert!(!t.should_trigger("Define expandable arrays"));
    }

    #[test]
    fn keyword_list_is_configurable() {
        let config = LiveAugmentationConfig {
            keywords: vec!["weather".into()],
            match_years: false,
            ..LiveAugmentationConfig::default()
        };
        let t = LiveTrigger::from_config(&config).unwrap();
        assert!(t.should_trigger("weather in Paris"));
        assert!(!t.should_trigger("latest news from 2024"));
    }

    #[test]
    fn disabled_never_fires() {
        let config = LiveAugmentationConfig {
            enabled: false,
            ..LiveAugmentationConfig::default()
        };
        let t = LiveTrigger::from_config(&config).unwrap();
        assert!(!t.should_trigger("latest news today"));
    }

    #[test]
    fn empty_keyword_list_only_matches_years() {
        let config = LiveAugmentationConfig {
            keywords: vec![],
            ..LiveAugmentationConfig::default()
        };
        let t = LiveTrigger::from_config(&config).unwrap();
        assert!(!t.should_trigger("latest news"));
        assert!(t.should_trigger("news 2025"));
    }
}
