// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Linguistic-completeness gate.
//!
//! Decides whether a transcribed utterance is a finished thought or trailed
//! off mid-sentence. A fast rule pass handles the common cases; only when the
//! rules cannot decide is a single short LLM arbitration call made, and a
//! failed call defaults to complete so the dialogue never stalls on it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::services::LlmService;

/// Outcome of the rule-based pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Complete,
    Incomplete,
    /// The rules cannot decide; arbitration may be used.
    Ambiguous,
}

/// Single trailing words that signal an unfinished clause.
const TRAILING_WORDS: &[&str] = &["and", "so", "but", "or", "because", "then"];

/// Trailing phrases that signal an unfinished thought.
const TRAILING_PHRASES: &[&str] = &[
    "i want to",
    "i need to",
    "i'd like to",
    "i'm trying to",
    "so basically",
    "and then",
    "but then",
    "or maybe",
    "i think",
    "i guess",
    "maybe",
    "perhaps",
];

/// Interrogatives that expect a question mark.
const QUESTION_WORDS: &[&str] = &["who", "what", "where", "when", "why", "how", "which"];

/// Openers that make a very short utterance read as cut off.
const INTENT_OPENERS: &[&str] = &["i want", "i need", "can you", "could you", "would you"];

/// Prompt for the arbitration call.
const ARBITRATION_PROMPT: &str = "Does this utterance sound like a COMPLETE thought or sentence?\n\
Consider: complete intent (e.g. \"I want to book an appointment\"), complete verb and object,\n\
or trailing off (\"I want to...\", \"So basically...\").\n\
Reply with ONLY one word: COMPLETE or INCOMPLETE\n\n\
User: \"{text}\"\n";

/// Classify an utterance with the rule pass alone.
pub fn rule_verdict(text: &str) -> RuleVerdict {
    let trimmed = text.trim();
    if trimmed.len() < 3 {
        // Too short to pause over; let the dialogue handle it.
        return RuleVerdict::Complete;
    }

    let lower = trimmed.to_lowercase();
    let lower = lower.trim_end_matches(|c: char| c == '"' || c == '\'').to_string();

    if lower.ends_with("...") || lower.ends_with('…') {
        return RuleVerdict::Incomplete;
    }

    let words: Vec<&str> = lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| !w.is_empty())
        .collect();
    let Some(&last_word) = words.last() else {
        return RuleVerdict::Complete;
    };

    if TRAILING_WORDS.contains(&last_word) {
        return RuleVerdict::Incomplete;
    }
    for phrase in TRAILING_PHRASES {
        if ends_with_phrase(&words, phrase) {
            return RuleVerdict::Incomplete;
        }
    }

    let has_question_mark = lower.contains('?');
    if !has_question_mark {
        if let Some(&first_word) = words.first() {
            if QUESTION_WORDS.contains(&first_word) {
                return RuleVerdict::Incomplete;
            }
        }
        if QUESTION_WORDS.contains(&last_word) {
            return RuleVerdict::Incomplete;
        }
    }

    if words.len() <= 3 {
        for opener in INTENT_OPENERS {
            if starts_with_phrase(&words, opener) {
                return RuleVerdict::Incomplete;
            }
        }
    }

    let terminal_punctuation = trimmed.ends_with('.') || trimmed.ends_with('!') || has_question_mark;
    if terminal_punctuation || words.len() >= 5 {
        return RuleVerdict::Complete;
    }

    RuleVerdict::Ambiguous
}

fn ends_with_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    words.len() >= parts.len() && words[words.len() - parts.len()..] == parts[..]
}

fn starts_with_phrase(words: &[&str], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split_whitespace().collect();
    words.len() >= parts.len() && words[..parts.len()] == parts[..]
}

/// Two-tier completeness gate over a rule pass plus optional LLM arbitration.
pub struct CompletenessGate {
    llm: Arc<dyn LlmService>,
}

impl CompletenessGate {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }

    /// Whether `text` is a complete thought.
    ///
    /// `allow_arbitration` bounds LLM usage: when false (or on any
    /// arbitration failure) an ambiguous rule verdict counts as complete.
    /// At most one arbitration call is made per invocation.
    pub async fn is_complete(&self, text: &str, allow_arbitration: bool) -> bool {
        match rule_verdict(text) {
            RuleVerdict::Complete => true,
            RuleVerdict::Incomplete => false,
            RuleVerdict::Ambiguous => {
                if !allow_arbitration {
                    return true;
                }
                let sanitized: String = text.replace('"', "'").chars().take(300).collect();
                let prompt = ARBITRATION_PROMPT.replace("{text}", &sanitized);
                match self.llm.classify(&prompt).await {
                    Ok(answer) => {
                        let incomplete = answer.to_uppercase().contains("INCOMPLETE");
                        debug!(incomplete, "completeness arbitration verdict");
                        !incomplete
                    }
                    Err(e) => {
                        warn!("completeness arbitration failed, assuming complete: {}", e);
                        true
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for CompletenessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletenessGate").finish()
    }
}
