// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Chunk-level VAD evaluation.
//!
//! [`VadEvaluator`] splits an incoming PCM chunk into 20 ms frames, classifies
//! each frame with the primary detector when one is installed, and derives a
//! chunk verdict from the speech-frame ratio. Without a primary detector (or
//! when it fails), the whole chunk is classified by the energy gate. Chunks
//! shorter than one frame always use the energy gate.

use tracing::debug;

use crate::audio::utils::average_magnitude;
use crate::audio::vad::{EnergyThresholds, VadVerdict};
use crate::audio::{FRAME_BYTES, FRAME_MS};

/// Error raised by a primary frame classifier.
#[derive(Debug, thiserror::Error)]
pub enum VadError {
    /// The primary detector rejected the frame or failed internally.
    #[error("primary detector failed: {0}")]
    Primary(String),
}

/// Per-frame speech classifier, the seam for a primary VAD backend.
///
/// Implementations receive exactly one 20 ms frame of PCM16 audio and decide
/// whether it contains speech. Classifiers may keep internal state and are
/// owned by a single session actor.
pub trait FrameClassifier: Send {
    /// Classify one 20 ms frame; `true` means speech.
    fn is_speech(&mut self, frame: &[u8]) -> Result<bool, VadError>;
}

/// Result of evaluating one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkEvaluation {
    /// Chunk-level verdict.
    pub verdict: VadVerdict,
    /// Number of 20 ms frames judged to contain speech.
    pub voiced_frames: usize,
    /// Number of 20 ms frames examined.
    pub total_frames: usize,
}

impl ChunkEvaluation {
    /// Scalar probability of the verdict.
    pub fn probability(&self) -> f64 {
        self.verdict.probability()
    }

    /// Duration of the voiced portion in milliseconds.
    pub fn voiced_ms(&self) -> u64 {
        self.voiced_frames as u64 * FRAME_MS
    }
}

/// Chunk-level VAD evaluator.
///
/// Holds an optional primary per-frame detector plus the energy-gate
/// thresholds used as fallback.
pub struct VadEvaluator {
    primary: Option<Box<dyn FrameClassifier>>,
    thresholds: EnergyThresholds,
}

impl VadEvaluator {
    /// Create an evaluator that uses only the energy gate.
    pub fn new() -> Self {
        Self {
            primary: None,
            thresholds: EnergyThresholds::default(),
        }
    }

    /// Create an evaluator with a primary per-frame detector.
    pub fn with_primary(classifier: Box<dyn FrameClassifier>) -> Self {
        Self {
            primary: Some(classifier),
            thresholds: EnergyThresholds::default(),
        }
    }

    /// Builder method: override the energy-gate thresholds.
    pub fn with_thresholds(mut self, thresholds: EnergyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Return whether a primary detector is installed.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Evaluate one PCM chunk.
    ///
    /// With a primary detector, the chunk is split into integral 20 ms frames
    /// and the verdict derives from the speech-frame ratio; a residual tail
    /// shorter than a frame is ignored for the ratio. Without a primary
    /// detector, or if every frame classification fails, the whole chunk is
    /// classified by the energy gate.
    pub fn evaluate(&mut self, chunk: &[u8]) -> ChunkEvaluation {
        if chunk.len() < FRAME_BYTES {
            return self.energy_evaluation(chunk);
        }

        if self.primary.is_none() {
            return self.energy_evaluation(chunk);
        }

        let mut voiced = 0usize;
        let mut total = 0usize;
        for frame in chunk.chunks_exact(FRAME_BYTES) {
            let classifier = self.primary.as_mut().expect("primary checked above");
            match classifier.is_speech(frame) {
                Ok(true) => {
                    voiced += 1;
                    total += 1;
                }
                Ok(false) => total += 1,
                Err(e) => {
                    // Skip the frame; a fully failed chunk falls back below.
                    debug!("primary VAD frame classification failed: {}", e);
                }
            }
        }

        if total == 0 {
            return self.energy_evaluation(chunk);
        }

        let ratio = voiced as f64 / total as f64;
        ChunkEvaluation {
            verdict: VadVerdict::from_speech_ratio(ratio),
            voiced_frames: voiced,
            total_frames: total,
        }
    }

    /// Classify a chunk with the energy gate alone.
    fn energy_evaluation(&self, chunk: &[u8]) -> ChunkEvaluation {
        let verdict = self.thresholds.verdict(average_magnitude(chunk));
        let total = (chunk.len() / FRAME_BYTES).max(usize::from(!chunk.is_empty()));
        // The gate has no per-frame resolution: a Voice chunk counts fully
        // voiced, anything weaker counts zero.
        let voiced = if verdict == VadVerdict::Voice { total } else { 0 };
        ChunkEvaluation {
            verdict,
            voiced_frames: voiced,
            total_frames: total,
        }
    }
}

impl Default for VadEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VadEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VadEvaluator")
            .field("has_primary", &self.has_primary())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

/// Build the evaluator stack configured for this binary.
///
/// With the `webrtc-vad` feature, installs the WebRTC detector as primary;
/// otherwise the energy gate carries classification alone.
pub fn default_evaluator() -> VadEvaluator {
    #[cfg(feature = "webrtc-vad")]
    {
        VadEvaluator::with_primary(Box::new(crate::audio::vad::webrtc::WebRtcClassifier::new()))
    }
    #[cfg(not(feature = "webrtc-vad"))]
    {
        VadEvaluator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: PCM16 bytes of a constant-amplitude square wave.
    fn tone_chunk(amplitude: i16, ms: u64) -> Vec<u8> {
        let samples = (ms as usize) * 16;
        let mut bytes = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let s = if i % 2 == 0 { amplitude } else { -amplitude };
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }

    /// Helper: silent PCM16 bytes.
    fn silence_chunk(ms: u64) -> Vec<u8> {
        vec![0u8; (ms as usize) * 32]
    }

    /// A scripted classifier for primary-detector tests.
    struct ScriptedClassifier {
        verdicts: Vec<Result<bool, VadError>>,
        next: usize,
    }

    impl ScriptedClassifier {
        fn new(verdicts: Vec<Result<bool, VadError>>) -> Self {
            Self { verdicts, next: 0 }
        }
    }

    impl FrameClassifier for ScriptedClassifier {
        fn is_speech(&mut self, _frame: &[u8]) -> Result<bool, VadError> {
            let i = self.next.min(self.verdicts.len() - 1);
            self.next += 1;
            match &self.verdicts[i] {
                Ok(b) => Ok(*b),
                Err(_) => Err(VadError::Primary("scripted failure".into())),
            }
        }
    }

    #[test]
    fn test_energy_gate_loud_chunk_is_voice() {
        let mut vad = VadEvaluator::new();
        // Amplitude 5000 / 32767 ~= 0.15, well above the clear threshold.
        let eval = vad.evaluate(&tone_chunk(5000, 200));
        assert_eq!(eval.verdict, VadVerdict::Voice);
        assert_eq!(eval.total_frames, 10);
        assert_eq!(eval.voiced_ms(), 200);
    }

    #[test]
    fn test_energy_gate_silence() {
        let mut vad = VadEvaluator::new();
        let eval = vad.evaluate(&silence_chunk(200));
        assert_eq!(eval.verdict, VadVerdict::Silence);
        assert_eq!(eval.voiced_frames, 0);
    }

    #[test]
    fn test_energy_gate_uncertain_band() {
        let mut vad = VadEvaluator::new();
        // 0.015 <= 656/32767 ~= 0.020 < 0.030.
        let eval = vad.evaluate(&tone_chunk(656, 200));
        assert_eq!(eval.verdict, VadVerdict::Uncertain);
        assert_eq!(eval.voiced_frames, 0);
    }

    #[test]
    fn test_energy_gate_weak_band() {
        let mut vad = VadEvaluator::new();
        // 0.005 <= 328/32767 ~= 0.010 < 0.015.
        let eval = vad.evaluate(&tone_chunk(328, 200));
        assert_eq!(eval.verdict, VadVerdict::WeakSignal);
    }

    #[test]
    fn test_short_tail_uses_energy_gate() {
        let mut primary_only = VadEvaluator::with_primary(Box::new(ScriptedClassifier::new(
            vec![Ok(false)],
        )));
        // 10 ms of loud audio: shorter than a frame, so the primary detector
        // is bypassed and the gate says Voice.
        let eval = primary_only.evaluate(&tone_chunk(5000, 10));
        assert_eq!(eval.verdict, VadVerdict::Voice);
    }

    #[test]
    fn test_primary_ratio_mapping() {
        // 10 frames: 5 voiced -> ratio 0.5 -> Voice.
        let script: Vec<Result<bool, VadError>> = (0..10).map(|i| Ok(i < 5)).collect();
        let mut vad = VadEvaluator::with_primary(Box::new(ScriptedClassifier::new(script)));
        let eval = vad.evaluate(&silence_chunk(200));
        assert_eq!(eval.verdict, VadVerdict::Voice);
        assert_eq!(eval.voiced_frames, 5);
        assert_eq!(eval.total_frames, 10);
        assert_eq!(eval.voiced_ms(), 100);
    }

    #[test]
    fn test_primary_uncertain_ratio() {
        // 10 frames: 3 voiced -> ratio 0.3 -> Uncertain.
        let script: Vec<Result<bool, VadError>> = (0..10).map(|i| Ok(i < 3)).collect();
        let mut vad = VadEvaluator::with_primary(Box::new(ScriptedClassifier::new(script)));
        let eval = vad.evaluate(&silence_chunk(200));
        assert_eq!(eval.verdict, VadVerdict::Uncertain);
    }

    #[test]
    fn test_primary_total_failure_falls_back_to_energy() {
        let mut vad = VadEvaluator::with_primary(Box::new(ScriptedClassifier::new(vec![Err(
            VadError::Primary("down".into()),
        )])));
        let eval = vad.evaluate(&tone_chunk(5000, 200));
        // All frames failed, so the energy gate decides.
        assert_eq!(eval.verdict, VadVerdict::Voice);
    }

    #[test]
    fn test_empty_chunk_is_silence() {
        let mut vad = VadEvaluator::new();
        let eval = vad.evaluate(&[]);
        assert_eq!(eval.verdict, VadVerdict::Silence);
        assert_eq!(eval.total_frames, 0);
    }
}
