// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Parlance - Real-time voice dialogue server with human-like turn-taking.
//!
//! Parlance accepts streamed microphone audio over a WebSocket, decides when
//! the user has finished speaking, transcribes the captured turn, generates a
//! reply with an LLM backend, synthesizes speech, and streams the reply back.
//! The turn-taking core combines voice activity detection, a timing-driven
//! state machine, barge-in detection, a linguistic-completeness gate, and
//! confidence-based routing of ASR results.

pub mod audio;
pub mod config;
pub mod conversation;
pub mod server;
pub mod services;
pub mod session;
pub mod transport;
pub mod turn;
pub mod utils;
