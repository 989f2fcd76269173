// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! AI service adapters (ASR, LLM, TTS).
//!
//! Each adapter hides a remote API behind a small async trait with closed
//! record types at the boundary, so the rest of the system never handles
//! loose JSON. Transient failures are retried once with a bounded backoff via
//! [`retry_once`]; a second failure surfaces to the caller.

pub mod elevenlabs;
pub mod groq;
pub mod whisper;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors raised by service adapters.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The HTTP request itself failed (network, timeout, TLS).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote API returned a non-success status.
    #[error("{service} returned {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },
    /// The response body could not be interpreted.
    #[error("unexpected {service} response: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },
}

/// Backoff applied between the first failure and the single retry.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Run `op`, retrying once after [`RETRY_BACKOFF`] on failure.
pub async fn retry_once<T, Fut, F>(what: &'static str, op: F) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!("{} failed, retrying once: {}", what, first);
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary record types
// ---------------------------------------------------------------------------

/// Result of a speech-to-text call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// Transcribed text, trimmed; empty when nothing was recognized.
    pub text: String,
    /// Self-reported probability in [0, 1], derived from segment
    /// log-probabilities.
    pub confidence: f64,
    /// Detected or configured language code.
    pub language: String,
}

impl Transcription {
    /// An empty result (nothing recognized).
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            language: "en".to_string(),
        }
    }

    /// Whether the transcription carries no text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One chat history message. Extra fields present in stored history are
/// dropped on deserialization, so adapters only ever see role and content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Result of a text-to-speech call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Encoded audio (MP3) ready for client playback.
    pub audio: Vec<u8>,
    /// Playback duration in seconds; used to bound the bot-speaking window.
    pub duration_secs: f64,
}

// ---------------------------------------------------------------------------
// Adapter traits
// ---------------------------------------------------------------------------

/// Speech-to-text adapter.
#[async_trait]
pub trait SttService: Send + Sync {
    /// Transcribe raw PCM16 mono 16 kHz audio.
    async fn transcribe(&self, pcm: &[u8]) -> Result<Transcription, ServiceError>;
}

/// Language-model adapter.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Generate a reply for an ordered message list.
    async fn reply(&self, messages: &[ChatMessage]) -> Result<String, ServiceError>;

    /// One-shot auxiliary prompt with short, deterministic output. Used by
    /// the linguistic-completeness gate.
    async fn classify(&self, prompt: &str) -> Result<String, ServiceError> {
        self.reply(&[ChatMessage::user(prompt)]).await
    }
}

/// Text-to-speech adapter.
#[async_trait]
pub trait TtsService: Send + Sync {
    /// Synthesize speech for the given text.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transcription_empty() {
        let t = Transcription::empty();
        assert!(t.is_empty());
        assert_eq!(t.confidence, 0.0);
        assert_eq!(t.language, "en");
    }

    #[test]
    fn test_transcription_whitespace_is_empty() {
        let t = Transcription {
            text: "   ".to_string(),
            confidence: 0.9,
            language: "en".to_string(),
        };
        assert!(t.is_empty());
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn test_chat_message_drops_extra_fields() {
        let raw = r#"{"role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00Z"}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, ChatMessage::user("hi"));
        let back = serde_json::to_value(&msg).unwrap();
        assert!(back.get("timestamp").is_none());
    }

    #[tokio::test]
    async fn test_retry_once_succeeds_second_time() {
        let attempts = AtomicU32::new(0);
        let result = retry_once("op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ServiceError::InvalidResponse {
                        service: "test",
                        detail: "first".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_two_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = retry_once("op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ServiceError::InvalidResponse {
                    service: "test",
                    detail: "down".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
