// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

/// Result of parsing mentions out of a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMentions {
    /// Mentioned model ids, de-duplicated, in order of first appearance.
    /// Does not include `all`.
    pub addressees: Vec<String>,
    /// The message with mention tokens removed and whitespace collapsed.
    pub clean_text: String,
    /// `@all` appeared somewhere in the message.
    pub broadcast: bool,
}

/// Recognizes `@model` tokens for a known model set plus `@all`.
///
/// Matching is case-insensitive at word boundaries.  A token embedded in a
/// larger word (an email-like `x@name.com`) is allowed to match; precision
/// is traded for simplicity.  An unknown name after `@` is left in the text
/// verbatim.
pub struct MentionParser {
    pattern: Regex,
    whitespace: Regex,
}

impl MentionParser {
    pub fn new<I, S>(known_models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = known_models
            .into_iter()
            .map(|s| regex::escape(&s.as_ref().to_lowercase()))
            .collect();
        names.push("all".into());
        let pattern = Regex::new(&format!(r"(?i)@({})\b", names.join("|"))).unwrap();
        Self {
            pattern,
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    pub fn parse(&self, text: &str) -> ParsedMentions {
        let mut addressees: Vec<String> = Vec::new();
        let mut broadcast = false;
        for captures in self.pattern.captures_iter(text) {
            let name = captures[1].to_lowercase();
            if name == "all" {
                broadcast = true;
            } else if !addressees.contains(&name) {
                addressees.push(name);
            }
        }

        let stripped = self.pattern.replace_all(text, "");
        let clean_text = self
            .whitespace
            .replace_all(stripped.trim(), " ")
            .into_owned();

        ParsedMentions {
            addressees,
            clean_text,
            broadcast,
        }
    }

    /// Which models are forced to speak: everyone on broadcast, otherwise
    /// the mentioned models that are actually available, preserving order.
    pub fn forced_speakers(&self, parsed: &ParsedMentions, available: &[String]) -> Vec<String> {
        if parsed.broadcast {
            return available.to_vec();
        }
        parsed
            .addressees
            .iter()
            .filter(|m| available.contains(m))
            .cloned()
            .collect()
    }

    pub fn contains_any_mention(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> MentionParser {
        MentionParser::new(["claude", "gpt", "gemini", "grok"])
    }

    #[test]
    fn single_mention_is_extracted_and_removed() {
        let parsed = parser().parse("@claude what do you think?");
        assert_eq!(parsed.addressees, vec!["claude"]);
        assert_eq!(parsed.clean_text, "what do you think?");
        assert!(!parsed.broadcast);
    }

    #[test]
    fn all_sets_broadcast_without_addressees() {
        let parsed = parser().parse("@all please help");
        assert!(parsed.broadcast);
        assert!(parsed.addressees.is_empty());
        assert_eq!(parsed.clean_text, "please help");
    }

    #[test]
    fn multiple_mentions_keep_first_appearance_order() {
        let parsed = parser().parse("@gpt @gemini compare approaches");
        assert_eq!(parsed.addressees, vec!["gpt", "gemini"]);
    }

    #[test]
    fn duplicates_are_removed() {
        let parsed = parser().parse("@claude look, @claude really");
        assert_eq!(parsed.addressees, vec!["claude"]);
        assert_eq!(parsed.clean_text, "look, really");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let parsed = parser().parse("@Claude and @GPT");
        assert_eq!(parsed.addressees, vec!["claude", "gpt"]);
    }

    #[test]
    fn unknown_names_stay_in_the_text() {
        let parsed = parser().parse("@alice fix this");
        assert!(parsed.addressees.is_empty());
        assert_eq!(parsed.clean_text, "@alice fix this");
    }

    #[test]
    fn mid_message_mention_collapses_whitespace() {
        let parsed = parser().parse("hey   @gemini   check this   out");
        assert_eq!(parsed.addressees, vec!["gemini"]);
        assert_eq!(parsed.clean_text, "hey check this out");
    }

    #[test]
    fn email_like_token_is_permitted_to_match() {
        // Precision traded for simplicity: the embedded token matches.
        let parsed = parser().parse("mail me at x@gpt.example");
        assert_eq!(parsed.addressees, vec!["gpt"]);
    }

    #[test]
    fn broadcast_forces_all_available() {
        let p = parser();
        let parsed = p.parse("@all help");
        let available = vec!["claude".to_string(), "gpt".to_string()];
        assert_eq!(p.forced_speakers(&parsed, &available), available);
    }

    #[test]
    fn forced_speakers_filters_unavailable() {
        let p = parser();
        let parsed = p.parse("@grok @claude go");
        let available = vec!["claude".to_string(), "gpt".to_string()];
        assert_eq!(p.forced_speakers(&parsed, &available), vec!["claude"]);
    }

    #[test]
    fn broadcast_with_explicit_addressees_records_both() {
        // `@all @claude` keeps both signals; the engine treats it as
        // broadcast because forced-speaker derivation checks broadcast first.
        let p = parser();
        let parsed = p.parse("@all @claude go");
        assert!(parsed.broadcast);
        assert_eq!(parsed.addressees, vec!["claude"]);
        let available = vec!["claude".to_string(), "gpt".to_string()];
        assert_eq!(p.forced_speakers(&parsed, &available), available);
    }

    #[test]
    fn clean_text_contains_no_known_mention_tokens() {
        let p = parser();
        for input in [
            "@claude hi",
            "@all @gpt mixed",
            "text @gemini middle @grok end",
        ] {
            let parsed = p.parse(input);
            assert!(
                !p.contains_any_mention(&parsed.clean_text),
                "clean text still has mentions: {}",
                parsed.clean_text
            );
        }
    }

    #[test]
    fn mention_only_message_yields_empty_clean_text() {
        let parsed = parser().parse("@claude");
        assert_eq!(parsed.clean_text, "");
        assert_eq!(parsed.addressees, vec!["claude"]);
    }
}
