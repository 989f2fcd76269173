// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn management: the turn-taking state machine and barge-in detection.
//!
//! [`engine::TurnEngine`] consumes VAD verdicts plus wall-clock time and
//! decides when a user turn begins and ends, when to nudge a silent user, and
//! when to encourage continuation of an incomplete thought.
//! [`barge_in::BargeInDetector`] watches frames while the bot is speaking and
//! raises a pre-emption signal on sustained user speech.

pub mod barge_in;
pub mod engine;

pub use barge_in::BargeInDetector;
pub use engine::TurnEngine;

use serde::{Deserialize, Serialize};

/// Events emitted by the turn engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The user turn ended; carries the accumulated PCM buffer.
    TurnEnd { audio: Vec<u8> },
    /// The user paused mid-thought; encourage them to continue.
    ContinuationCue,
    /// Nothing heard for a while; check the user is still there.
    Nudge,
    /// The user is taking long to continue; reassure them.
    Comfort,
}

/// Turn engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No turn in progress.
    Idle,
    /// Accumulating a user turn.
    Listening,
    /// Initial silence observed; waiting out the confirmation window.
    CandidateEnd,
    /// A linguistically incomplete turn ended; waiting for a continuation.
    WaitingIncomplete,
}

/// Per-session timing configuration, in milliseconds.
///
/// All values are overridable at session creation; the defaults are the
/// production values tuned for natural-feeling turn taking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Initial silence after speech before the turn becomes a candidate end.
    pub candidate_end_ms: u64,
    /// Additional confirmation silence before the turn end is emitted.
    pub final_end_ms: u64,
    /// Minimum accumulated speech for a turn to be eligible for emission.
    pub min_speech_ms: u64,
    /// Idle silence before a nudge prompt.
    pub nudge_ms: u64,
    /// Silence in the incomplete wait before a continuation cue.
    pub incomplete_wait_ms: u64,
    /// Further silence in the incomplete wait before a comfort prompt.
    pub comfort_wait_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            candidate_end_ms: 1000,
            final_end_ms: 400,
            min_speech_ms: 300,
            nudge_ms: 1500,
            incomplete_wait_ms: 300,
            comfort_wait_ms: 1500,
        }
    }
}

/// Maximum number of nudges emitted per session; further expiries of the
/// nudge timer are suppressed without resetting the counter.
pub const MAX_NUDGES: u32 = 3;
