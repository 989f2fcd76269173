// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! ElevenLabs text-to-speech adapter.
//!
//! Uses `POST /v1/text-to-speech/{voice_id}` to synthesize a complete MP3 for
//! each reply. The HTTP endpoint does not report playback duration, so the
//! adapter estimates it from the word count at a spoken rate; the estimate
//! only gates the bot-speaking window used for barge-in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::{ServiceError, SynthesizedAudio, TtsService};

/// Voice settings controlling stability and similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f64,
    pub similarity_boost: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.45,
            similarity_boost: 0.85,
        }
    }
}

/// JSON body for the synthesis request.
#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

/// Average spoken rate used for duration estimation, in words per second.
const SPOKEN_WORDS_PER_SEC: f64 = 2.5;

/// Floor for the duration estimate in seconds.
const MIN_ESTIMATED_SECS: f64 = 1.0;

/// ElevenLabs HTTP text-to-speech adapter.
pub struct ElevenLabsTtsService {
    api_key: String,
    voice_id: String,
    model_id: String,
    voice_settings: VoiceSettings,
    base_url: String,
    client: reqwest::Client,
}

impl ElevenLabsTtsService {
    const DEFAULT_BASE_URL: &'static str = "https://api.elevenlabs.io";

    /// Create an adapter with the low-latency turbo model.
    pub fn new(api_key: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            model_id: "eleven_turbo_v2".to_string(),
            voice_settings: VoiceSettings::default(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
        }
    }

    /// Builder method: set the synthesis model.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Builder method: set the voice settings.
    pub fn with_voice_settings(mut self, settings: VoiceSettings) -> Self {
        self.voice_settings = settings;
        self
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            self.voice_id,
        )
    }

    /// Estimate playback duration from the word count.
    fn estimate_duration_secs(text: &str) -> f64 {
        let words = text.split_whitespace().count();
        (words as f64 / SPOKEN_WORDS_PER_SEC).max(MIN_ESTIMATED_SECS)
    }
}

#[async_trait]
impl TtsService for ElevenLabsTtsService {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, ServiceError> {
        let request = SynthesisRequest {
            text,
            model_id: &self.model_id,
            voice_settings: &self.voice_settings,
        };

        debug!("elevenlabs: synthesizing {} chars", text.len());

        let response = self
            .client
            .post(self.api_url())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                service: "elevenlabs",
                status: status.as_u16(),
                message,
            });
        }

        let audio = response.bytes().await?.to_vec();
        if audio.is_empty() {
            return Err(ServiceError::InvalidResponse {
                service: "elevenlabs",
                detail: "empty audio body".to_string(),
            });
        }

        Ok(SynthesizedAudio {
            duration_secs: Self::estimate_duration_secs(text),
            audio,
        })
    }
}

impl std::fmt::Debug for ElevenLabsTtsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsTtsService")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let tts = ElevenLabsTtsService::new("key", "voice-1");
        assert_eq!(tts.model_id, "eleven_turbo_v2");
        assert!((tts.voice_settings.stability - 0.45).abs() < f64::EPSILON);
        assert!((tts.voice_settings.similarity_boost - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_api_url() {
        let tts = ElevenLabsTtsService::new("key", "voice-1");
        assert_eq!(
            tts.api_url(),
            "https://api.elevenlabs.io/v1/text-to-speech/voice-1"
        );
    }

    #[test]
    fn test_estimate_duration() {
        // 10 words at 2.5 words/sec = 4 seconds.
        let text = "one two three four five six seven eight nine ten";
        let d = ElevenLabsTtsService::estimate_duration_secs(text);
        assert!((d - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_duration_floor() {
        assert_eq!(ElevenLabsTtsService::estimate_duration_secs("hi"), 1.0);
        assert_eq!(ElevenLabsTtsService::estimate_duration_secs(""), 1.0);
    }

    #[test]
    fn test_request_serialization() {
        let settings = VoiceSettings::default();
        let request = SynthesisRequest {
            text: "hello",
            model_id: "eleven_turbo_v2",
            voice_settings: &settings,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["text"], "hello");
        assert_eq!(value["model_id"], "eleven_turbo_v2");
        assert!((value["voice_settings"]["stability"].as_f64().unwrap() - 0.45).abs() < 1e-9);
    }
}
