// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Wire messages for the voice WebSocket.
//!
//! Binary frames carry raw PCM16 audio client-to-server; everything else is
//! JSON with a `type` tag. Audio in server responses is base64-encoded MP3.
//!
//! ```json
//! { "type": "transcription", "text": "...", "confidence": 0.92, "language": "en", "action": "ACCEPT" }
//! { "type": "response", "text": "...", "audio": "<base64>", "conversation_state": "LISTENING" }
//! { "type": "barge_in" }
//! { "type": "nudge", "text": "Are you still there?" }
//! { "type": "continuation_cue", "text": "Mm-hmm… go on." }
//! { "type": "comfort", "text": "Take your time, I'm listening." }
//! { "type": "pong" }
//! { "type": "error", "code": "...", "message": "..." }
//! ```

use serde::{Deserialize, Serialize};

use crate::utils::encode_base64;

/// JSON messages sent server-to-client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Interim ASR result for a captured turn.
    Transcription {
        text: String,
        confidence: f64,
        language: String,
        action: String,
    },
    /// Bot reply with synthesized audio.
    Response {
        text: String,
        /// Base64-encoded MP3; empty when synthesis was unavailable.
        audio: String,
        conversation_state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        should_end: Option<bool>,
    },
    /// The client must immediately stop playback.
    BargeIn,
    /// Prompt after prolonged idle silence.
    Nudge { text: String },
    /// Prompt encouraging an unfinished thought to continue.
    ContinuationCue { text: String },
    /// Reassurance during a long incomplete pause.
    Comfort { text: String },
    /// Reply to a client ping.
    Pong,
    /// Fatal failure; the session will close.
    Error { code: String, message: String },
}

impl ServerMessage {
    /// Build a `response` message, encoding the audio payload.
    pub fn response(
        text: impl Into<String>,
        audio: &[u8],
        conversation_state: &str,
        should_end: bool,
    ) -> Self {
        Self::Response {
            text: text.into(),
            audio: encode_base64(audio),
            conversation_state: conversation_state.to_string(),
            should_end: should_end.then_some(true),
        }
    }

    /// Build a fatal `error` message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Serialize for the wire. Serialization of these owned types cannot
    /// fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server message serialization")
    }
}

/// JSON control messages received from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe; answered with `pong`.
    Ping,
    /// Graceful end of the audio stream.
    End,
}
