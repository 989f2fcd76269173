// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Confidence-based routing of ASR results.
//!
//! The router maps a transcription's self-reported confidence onto an action:
//! high confidence passes straight through, a broad middle band is accepted
//! without prompting (soft accept), a narrow band just above the floor asks
//! the user to confirm, and anything below the floor is rejected. Empty text
//! is always rejected regardless of confidence.

use crate::services::Transcription;

/// Action chosen for a transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// High confidence; use the text as-is.
    Accept,
    /// Moderate confidence; use the text without prompting for confirmation.
    AcceptSoft,
    /// Barely usable; ask the user to confirm before spending a turn.
    Clarify,
    /// Unusable; ask the user to repeat.
    Reject,
}

impl RouteAction {
    /// Wire label reported to the client. Soft accepts read as plain accepts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept | Self::AcceptSoft => "ACCEPT",
            Self::Clarify => "CLARIFY",
            Self::Reject => "REJECT",
        }
    }

    /// Whether the text should flow onward to the dialogue.
    pub fn is_accept(self) -> bool {
        matches!(self, Self::Accept | Self::AcceptSoft)
    }
}

/// Maps `(text, confidence)` onto a [`RouteAction`].
#[derive(Debug, Clone)]
pub struct ConfidenceRouter {
    high_threshold: f64,
    soft_threshold: f64,
    low_threshold: f64,
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            soft_threshold: 0.3,
            low_threshold: 0.2,
        }
    }
}

impl ConfidenceRouter {
    /// Create a router with explicit thresholds.
    pub fn new(high_threshold: f64, soft_threshold: f64, low_threshold: f64) -> Self {
        Self {
            high_threshold,
            soft_threshold,
            low_threshold,
        }
    }

    /// Route a transcription.
    pub fn route(&self, transcription: &Transcription) -> RouteAction {
        if transcription.is_empty() {
            return RouteAction::Reject;
        }
        let c = transcription.confidence;
        if c >= self.high_threshold {
            RouteAction::Accept
        } else if c >= self.soft_threshold {
            RouteAction::AcceptSoft
        } else if c >= self.low_threshold {
            RouteAction::Clarify
        } else {
            RouteAction::Reject
        }
    }

    /// Clarification prompt matched to how close the recognizer got.
    pub fn clarification_message(&self, confidence: f64) -> &'static str {
        if confidence >= 0.7 {
            "I think I heard you, but could you confirm that?"
        } else {
            "I didn't catch that clearly. Could you please repeat?"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(text: &str, confidence: f64) -> Transcription {
        Transcription {
            text: text.to_string(),
            confidence,
            language: "en".to_string(),
        }
    }

    #[test]
    fn test_high_confidence_accepts() {
        let r = ConfidenceRouter::default();
        assert_eq!(r.route(&t("book me in", 0.95)), RouteAction::Accept);
        assert_eq!(r.route(&t("book me in", 0.8)), RouteAction::Accept);
    }

    #[test]
    fn test_middle_band_soft_accepts() {
        let r = ConfidenceRouter::default();
        assert_eq!(r.route(&t("book me in", 0.79)), RouteAction::AcceptSoft);
        assert_eq!(r.route(&t("book me in", 0.3)), RouteAction::AcceptSoft);
    }

    #[test]
    fn test_low_band_clarifies() {
        let r = ConfidenceRouter::default();
        assert_eq!(r.route(&t("book me in", 0.29)), RouteAction::Clarify);
        assert_eq!(r.route(&t("book me in", 0.2)), RouteAction::Clarify);
    }

    #[test]
    fn test_floor_rejects() {
        let r = ConfidenceRouter::default();
        assert_eq!(r.route(&t("book me in", 0.19)), RouteAction::Reject);
        assert_eq!(r.route(&t("book me in", 0.0)), RouteAction::Reject);
    }

    #[test]
    fn test_empty_text_always_rejects() {
        let r = ConfidenceRouter::default();
        assert_eq!(r.route(&t("", 0.99)), RouteAction::Reject);
        assert_eq!(r.route(&t("   ", 0.99)), RouteAction::Reject);
    }

    #[test]
    fn test_wire_labels() {
        assert_eq!(RouteAction::Accept.as_str(), "ACCEPT");
        assert_eq!(RouteAction::AcceptSoft.as_str(), "ACCEPT");
        assert_eq!(RouteAction::Clarify.as_str(), "CLARIFY");
        assert_eq!(RouteAction::Reject.as_str(), "REJECT");
    }

    #[test]
    fn test_clarification_message_by_confidence() {
        let r = ConfidenceRouter::default();
        assert!(r.clarification_message(0.75).contains("confirm"));
        assert!(r.clarification_message(0.25).contains("repeat"));
    }
}
