// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Barge-in detection during bot playback.
//!
//! While the bot is speaking, every incoming chunk is split into 20 ms frames
//! and scored by the VAD stack. Two consecutive voiced frames (~40 ms of
//! continuous speech) raise a pre-emption signal; any non-speech frame resets
//! the run. One frame alone is too easily produced by a sibilant or a click.

use tracing::debug;

use crate::audio::vad::evaluator::VadEvaluator;
use crate::audio::FRAME_BYTES;

/// Consecutive voiced frames required to confirm a barge-in.
const BARGE_IN_FRAMES: u32 = 2;

/// Per-frame probability at or above which a frame counts as speech.
const BARGE_IN_PROBABILITY: f64 = 0.6;

/// Detects user speech that should pre-empt bot playback.
pub struct BargeInDetector {
    evaluator: VadEvaluator,
    consecutive_speech_frames: u32,
}

impl BargeInDetector {
    /// Create a detector with its own VAD stack.
    pub fn new(evaluator: VadEvaluator) -> Self {
        Self {
            evaluator,
            consecutive_speech_frames: 0,
        }
    }

    /// Current run of consecutive voiced frames.
    pub fn consecutive_speech_frames(&self) -> u32 {
        self.consecutive_speech_frames
    }

    /// Feed one chunk observed while the bot is speaking.
    ///
    /// Returns `true` when the barge-in threshold is reached; the caller must
    /// then clear the bot-speaking flag, notify the client, and let the turn
    /// engine process the same chunk normally. A residual tail shorter than a
    /// frame is scored by the energy fallback inside the evaluator.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> bool {
        for frame in chunk.chunks(FRAME_BYTES) {
            let eval = self.evaluator.evaluate(frame);
            if eval.probability() >= BARGE_IN_PROBABILITY {
                self.consecutive_speech_frames += 1;
                if self.consecutive_speech_frames >= BARGE_IN_FRAMES {
                    debug!("barge-in detected");
                    self.consecutive_speech_frames = 0;
                    return true;
                }
            } else {
                self.consecutive_speech_frames = 0;
            }
        }
        false
    }

    /// Clear the frame run; called whenever bot playback stops.
    pub fn reset(&mut self) {
        self.consecutive_speech_frames = 0;
    }
}

impl std::fmt::Debug for BargeInDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BargeInDetector")
            .field(
                "consecutive_speech_frames",
                &self.consecutive_speech_frames,
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BargeInDetector {
        BargeInDetector::new(VadEvaluator::new())
    }

    fn voiced_frame() -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_BYTES);
        for i in 0..(FRAME_BYTES / 2) {
            let s: i16 = if i % 2 == 0 { 5000 } else { -5000 };
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    fn silent_frame() -> Vec<u8> {
        vec![0u8; FRAME_BYTES]
    }

    #[test]
    fn test_two_consecutive_voiced_frames_trigger() {
        let mut d = detector();
        assert!(!d.process_chunk(&voiced_frame()));
        assert!(d.process_chunk(&voiced_frame()));
        // The run resets after firing.
        assert_eq!(d.consecutive_speech_frames(), 0);
    }

    #[test]
    fn test_single_frame_within_chunk_does_not_trigger() {
        let mut d = detector();
        let mut chunk = voiced_frame();
        chunk.extend_from_slice(&silent_frame());
        assert!(!d.process_chunk(&chunk));
        assert_eq!(d.consecutive_speech_frames(), 0);
    }

    #[test]
    fn test_two_frames_in_one_chunk_trigger() {
        let mut d = detector();
        let mut chunk = voiced_frame();
        chunk.extend_from_slice(&voiced_frame());
        assert!(d.process_chunk(&chunk));
    }

    #[test]
    fn test_silence_resets_run() {
        let mut d = detector();
        assert!(!d.process_chunk(&voiced_frame()));
        assert!(!d.process_chunk(&silent_frame()));
        assert!(!d.process_chunk(&voiced_frame()));
        // Interleaved silence keeps the run below the threshold.
        assert_eq!(d.consecutive_speech_frames(), 1);
    }

    #[test]
    fn test_reset_clears_run() {
        let mut d = detector();
        d.process_chunk(&voiced_frame());
        d.reset();
        assert_eq!(d.consecutive_speech_frames(), 0);
        assert!(!d.process_chunk(&voiced_frame()));
    }

    #[test]
    fn test_silence_never_triggers() {
        let mut d = detector();
        for _ in 0..100 {
            assert!(!d.process_chunk(&silent_frame()));
        }
    }
}
