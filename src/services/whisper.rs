// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Whisper speech-to-text adapter.
//!
//! Posts captured turn audio to an OpenAI-compatible
//! `POST /v1/audio/transcriptions` endpoint with
//! `response_format=verbose_json` and derives a confidence score from the
//! per-segment average log probabilities (`exp(avg_logprob)`, clamped to
//! [0, 1], averaged across segments). The PCM buffer is wrapped in an
//! in-memory WAV container; nothing touches the filesystem. Whisper's own
//! VAD filter is not requested because turn-end is already decided upstream.
//!
//! # Dependencies (already in Cargo.toml)
//!
//! - `reqwest` (with the `json` feature) -- HTTP client
//! - `serde` / `serde_json` -- JSON serialization
//! - `tokio` -- async runtime
//! - `tracing` -- structured logging

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::audio::{NUM_CHANNELS, SAMPLE_RATE};
use crate::services::{ServiceError, SttService, Transcription};

// ---------------------------------------------------------------------------
// Whisper API response types
// ---------------------------------------------------------------------------

/// A segment within a verbose_json response from the Whisper API.
#[derive(Debug, Clone, Deserialize)]
pub struct WhisperSegment {
    /// Transcribed text for this segment.
    pub text: String,
    /// Average log probability across the segment's tokens.
    #[serde(default)]
    pub avg_logprob: f64,
}

/// Verbose JSON response from the Whisper API.
#[derive(Debug, Clone, Deserialize)]
pub struct WhisperVerboseResponse {
    /// The full transcribed text.
    pub text: String,
    /// Detected or specified language.
    #[serde(default)]
    pub language: Option<String>,
    /// Transcription segments with confidence information.
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
}

/// Whisper API error response.
#[derive(Debug, Clone, Deserialize)]
struct WhisperErrorResponse {
    error: WhisperErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// WAV encoding
// ---------------------------------------------------------------------------

/// Encode raw PCM data (16-bit signed little-endian) into a WAV container.
///
/// The resulting `Vec<u8>` contains a valid WAV file that can be sent
/// directly to the transcription API.
pub fn encode_pcm_to_wav(pcm: &[u8], sample_rate: u32, num_channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * u32::from(num_channels) * u32::from(bits_per_sample) / 8;
    let block_align = num_channels * bits_per_sample / 8;
    let data_size = pcm.len() as u32;
    // RIFF header (12 bytes) + fmt chunk (24 bytes) + data header (8 bytes).
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(44 + pcm.len());

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // Sub-chunk size (16 for PCM)
    wav.extend_from_slice(&1u16.to_le_bytes()); // Audio format: 1 = PCM
    wav.extend_from_slice(&num_channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data sub-chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

// ---------------------------------------------------------------------------
// Multipart form builder (manual, no reqwest multipart feature needed)
// ---------------------------------------------------------------------------

/// A simple multipart/form-data builder that constructs the body and
/// content-type header without requiring the `reqwest` multipart feature.
struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    fn new() -> Self {
        let boundary = format!(
            "----ParlanceWhisperBoundary{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        Self {
            boundary,
            body: Vec::new(),
        }
    }

    /// Add a simple text field.
    fn add_text(&mut self, name: &str, value: &str) {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
    }

    /// Add a file field with the given bytes, filename, and content type.
    fn add_file(&mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, filename
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
    }

    /// Finalize the form body and return `(content_type_header, body_bytes)`.
    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);
        (content_type, self.body)
    }
}

// ---------------------------------------------------------------------------
// WhisperAsrService
// ---------------------------------------------------------------------------

/// Whisper batch speech-to-text adapter.
pub struct WhisperAsrService {
    api_key: String,
    model: String,
    /// Optional BCP-47 language hint (e.g. `"en"`).
    language: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl WhisperAsrService {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    /// Create an adapter with the default model (`whisper-1`) and base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
        }
    }

    /// Builder method: set the transcription model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method: set or clear the language hint.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Builder method: set a custom API base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Build the full API URL for the transcriptions endpoint.
    fn api_url(&self) -> String {
        let host = self.base_url.trim_end_matches('/');
        format!("{}/v1/audio/transcriptions", host)
    }

    /// Build the multipart form body for a transcription request.
    fn build_request_body(&self, wav_data: &[u8]) -> (String, Vec<u8>) {
        let mut form = MultipartForm::new();
        form.add_file("file", "audio.wav", "audio/wav", wav_data);
        form.add_text("model", &self.model);
        if let Some(ref lang) = self.language {
            form.add_text("language", lang);
        }
        form.add_text("response_format", "verbose_json");
        form.finish()
    }

    /// Derive a [0, 1] confidence from verbose response segments.
    fn confidence_from_segments(segments: &[WhisperSegment]) -> f64 {
        if segments.is_empty() {
            return 0.0;
        }
        let sum: f64 = segments
            .iter()
            .map(|s| s.avg_logprob.exp().clamp(0.0, 1.0))
            .sum();
        sum / segments.len() as f64
    }

    /// Parse a verbose_json response body into a [`Transcription`].
    fn parse_response(&self, body: &str) -> Result<Transcription, ServiceError> {
        let resp: WhisperVerboseResponse =
            serde_json::from_str(body).map_err(|e| ServiceError::InvalidResponse {
                service: "whisper",
                detail: e.to_string(),
            })?;

        let text = resp.text.trim().to_string();
        if text.is_empty() {
            return Ok(Transcription {
                text: String::new(),
                confidence: 0.0,
                language: resp.language.unwrap_or_else(|| "en".to_string()),
            });
        }

        Ok(Transcription {
            confidence: Self::confidence_from_segments(&resp.segments),
            language: resp
                .language
                .or_else(|| self.language.clone())
                .unwrap_or_else(|| "en".to_string()),
            text,
        })
    }
}

#[async_trait]
impl SttService for WhisperAsrService {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Transcription, ServiceError> {
        let wav = encode_pcm_to_wav(pcm, SAMPLE_RATE, NUM_CHANNELS);
        let (content_type, body) = self.build_request_body(&wav);

        debug!(
            "whisper: sending {:.1}KB audio to {}",
            body.len() as f64 / 1024.0,
            self.api_url(),
        );

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<WhisperErrorResponse>(&text) {
                Ok(err) => err.error.message,
                Err(_) => text,
            };
            return Err(ServiceError::Api {
                service: "whisper",
                status: status.as_u16(),
                message,
            });
        }

        self.parse_response(&text)
    }
}

impl std::fmt::Debug for WhisperAsrService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperAsrService")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("base_url", &self.base_url)
            .finish()
    }
}
