// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WebRTC VAD primary detector (behind the `webrtc-vad` feature).

use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::audio::vad::evaluator::{FrameClassifier, VadError};

/// Per-frame classifier backed by the WebRTC VAD at aggressiveness level 2.
pub struct WebRtcClassifier {
    vad: Vad,
}

impl WebRtcClassifier {
    /// Create a classifier for 16 kHz input.
    pub fn new() -> Self {
        Self {
            vad: Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, VadMode::Aggressive),
        }
    }
}

impl Default for WebRtcClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// The underlying detector holds a raw pointer and is not auto-Send; each
// instance is owned by exactly one session actor with `&mut` access.
unsafe impl Send for WebRtcClassifier {}

impl FrameClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &[u8]) -> Result<bool, VadError> {
        let samples: Vec<i16> = frame
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.vad
            .is_voice_segment(&samples)
            .map_err(|_| VadError::Primary("invalid frame length for webrtc vad".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_silence_frame() {
        let mut classifier = WebRtcClassifier::new();
        let silence = vec![0u8; crate::audio::FRAME_BYTES];
        let speech = classifier.is_speech(&silence).expect("valid frame");
        assert!(!speech);
    }

    #[test]
    fn test_rejects_bad_frame_length() {
        let mut classifier = WebRtcClassifier::new();
        // 100 samples is not a supported WebRTC frame size at 16 kHz.
        let bad = vec![0u8; 200];
        assert!(classifier.is_speech(&bad).is_err());
    }
}
