// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voice Activity Detection (VAD) subsystem.
//!
//! The [`evaluator::VadEvaluator`] maps a raw PCM chunk to a chunk-level
//! [`VadVerdict`]. Frames are classified by an optional primary detector (a
//! WebRTC-style VAD behind the `webrtc-vad` feature) with an energy-gate
//! fallback that is always available.

pub mod evaluator;
#[cfg(feature = "webrtc-vad")]
pub mod webrtc;

use serde::{Deserialize, Serialize};

/// Chunk-level VAD verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadVerdict {
    /// Clear speech (speech-frame ratio >= 0.50).
    Voice,
    /// Mixed signal (ratio in [0.25, 0.50)).
    Uncertain,
    /// Some signal but mostly quiet (ratio in (0, 0.25)).
    WeakSignal,
    /// No speech at all.
    Silence,
}

impl VadVerdict {
    /// Scalar probability associated with the verdict.
    pub fn probability(self) -> f64 {
        match self {
            Self::Voice => 1.0,
            Self::Uncertain => 0.5,
            Self::WeakSignal => 0.3,
            Self::Silence => 0.0,
        }
    }

    /// Map a speech-frame ratio in [0, 1] onto a verdict.
    pub fn from_speech_ratio(ratio: f64) -> Self {
        if ratio >= 0.5 {
            Self::Voice
        } else if ratio >= 0.25 {
            Self::Uncertain
        } else if ratio > 0.0 {
            Self::WeakSignal
        } else {
            Self::Silence
        }
    }
}

/// Thresholds for the energy-gate fallback, applied to the normalized mean
/// sample magnitude in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyThresholds {
    /// At or above this, the chunk is clear speech.
    pub clear: f64,
    /// At or above this, the chunk is uncertain.
    pub uncertain: f64,
    /// At or above this, the chunk is a weak signal.
    pub weak: f64,
}

impl Default for EnergyThresholds {
    fn default() -> Self {
        Self {
            clear: 0.030,
            uncertain: 0.015,
            weak: 0.005,
        }
    }
}

impl EnergyThresholds {
    /// Classify a normalized mean magnitude against the thresholds.
    pub fn verdict(&self, magnitude: f64) -> VadVerdict {
        if magnitude >= self.clear {
            VadVerdict::Voice
        } else if magnitude >= self.uncertain {
            VadVerdict::Uncertain
        } else if magnitude >= self.weak {
            VadVerdict::WeakSignal
        } else {
            VadVerdict::Silence
        }
    }
}
