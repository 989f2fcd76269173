// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn-taking state machine.
//!
//! The engine advances on exactly two inputs: an incoming PCM chunk (with its
//! arrival timestamp) or a bare timer tick. Two-stage silence detection (a
//! grace window followed by a confirmation window) prevents cutting users off
//! during natural pauses, and a minimum-speech threshold keeps noise-only
//! turns from reaching the ASR.
//!
//! Timer evaluation precedes chunk processing within a single step, so a turn
//! end that became due before a chunk arrived fires before the chunk can
//! reset the silence clock. A chunk straddling a threshold is first
//! classified, then appended, then used to test the silence condition against
//! its end-of-chunk time.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::pcm_duration_ms;
use crate::audio::vad::evaluator::VadEvaluator;
use crate::audio::vad::VadVerdict;
use crate::turn::{EngineState, TurnConfig, TurnEvent, MAX_NUDGES};

/// Multi-signal turn-end detection: VAD + grace window + confirmation window
/// + minimum speech.
///
/// Emits [`TurnEvent::TurnEnd`], [`TurnEvent::ContinuationCue`],
/// [`TurnEvent::Nudge`], and [`TurnEvent::Comfort`]. The engine never blocks
/// on its consumer; events are returned to the caller in the order they
/// occur.
pub struct TurnEngine {
    config: TurnConfig,
    evaluator: VadEvaluator,
    state: EngineState,

    /// PCM accumulated for the current user turn.
    buffer: Vec<u8>,
    /// Voiced milliseconds accumulated for the current turn.
    speech_accumulated_ms: u64,

    listening_started_at: Option<Instant>,
    last_speech_at: Option<Instant>,
    silence_started_at: Option<Instant>,
    incomplete_started_at: Option<Instant>,
    /// Base of the nudge timer; `None` while the engine is not armed.
    idle_entered_at: Option<Instant>,

    nudge_count: u32,
    continuation_count: u32,
    comfort_count: u32,
    /// Set once a continuation cue has been emitted for the current wait.
    cue_emitted_this_wait: bool,
}

impl TurnEngine {
    /// Create an engine with the given timing configuration and VAD stack.
    ///
    /// The engine starts in [`EngineState::Idle`] with the nudge timer
    /// stopped; call [`arm`](Self::arm) once the session is ready to listen.
    pub fn new(config: TurnConfig, evaluator: VadEvaluator) -> Self {
        Self {
            config,
            evaluator,
            state: EngineState::Idle,
            buffer: Vec::new(),
            speech_accumulated_ms: 0,
            listening_started_at: None,
            last_speech_at: None,
            silence_started_at: None,
            incomplete_started_at: None,
            idle_entered_at: None,
            nudge_count: 0,
            continuation_count: 0,
            comfort_count: 0,
            cue_emitted_this_wait: false,
        }
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Timing configuration in effect.
    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Nudges emitted so far this session.
    pub fn nudge_count(&self) -> u32 {
        self.nudge_count
    }

    /// Continuation cues emitted so far this session.
    pub fn continuation_count(&self) -> u32 {
        self.continuation_count
    }

    /// Comfort prompts emitted so far this session.
    pub fn comfort_count(&self) -> u32 {
        self.comfort_count
    }

    /// Voiced milliseconds accumulated for the current turn.
    pub fn speech_accumulated_ms(&self) -> u64 {
        self.speech_accumulated_ms
    }

    /// Bytes of PCM buffered for the current turn.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Reset to [`EngineState::Idle`] and start the nudge clock.
    pub fn arm(&mut self, now: Instant) {
        self.reset_turn(now);
    }

    /// Reset after the consumer has fully processed a turn.
    pub fn finalize_turn(&mut self, now: Instant) {
        self.reset_turn(now);
    }

    /// Restart the nudge clock without touching turn state.
    ///
    /// Called when bot playback finishes so idle time spent listening to the
    /// bot does not count toward the nudge deadline.
    pub fn reset_idle_timer(&mut self, now: Instant) {
        if self.state == EngineState::Idle {
            self.idle_entered_at = Some(now);
        }
    }

    /// Enter the incomplete wait after a linguistically incomplete turn.
    ///
    /// The already-emitted audio is not retained; the consumer keeps the
    /// transcribed prefix and concatenates it with the continuation's
    /// transcription.
    pub fn wait_for_continuation(&mut self, now: Instant) {
        self.state = EngineState::WaitingIncomplete;
        self.buffer.clear();
        self.speech_accumulated_ms = 0;
        self.listening_started_at = None;
        self.last_speech_at = None;
        self.silence_started_at = None;
        self.incomplete_started_at = Some(now);
        self.idle_entered_at = None;
        self.cue_emitted_this_wait = false;
    }

    /// Evaluate all timers at `now` without consuming audio.
    pub fn tick(&mut self, now: Instant) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        self.expire_silence_timers(now, &mut events);
        self.expire_incomplete_timers(now, &mut events);
        self.expire_nudge_timer(now, &mut events);
        events
    }

    /// Process one PCM chunk whose capture started at `now`.
    ///
    /// Returns the events that became due, in order. Timer expiry is
    /// evaluated first; the chunk's own effect on silence thresholds is
    /// tested against its end-of-chunk time.
    pub fn process_chunk(&mut self, chunk: &[u8], now: Instant) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        self.expire_silence_timers(now, &mut events);
        self.expire_incomplete_timers(now, &mut events);

        if chunk.len() < 2 {
            return events;
        }

        let eval = self.evaluator.evaluate(chunk);
        let verdict = eval.verdict;
        let end_of_chunk = now + Duration::from_millis(pcm_duration_ms(chunk.len()));

        match self.state {
            EngineState::Idle => {
                // Uncertain counts as speech here so a quiet speaker is not
                // left stranded in Idle.
                if matches!(verdict, VadVerdict::Voice | VadVerdict::Uncertain) {
                    debug!(?verdict, "turn start");
                    self.begin_turn(chunk, eval.voiced_ms(), now, end_of_chunk);
                } else {
                    self.expire_nudge_timer(now, &mut events);
                }
            }
            EngineState::Listening => {
                self.buffer.extend_from_slice(chunk);
                match verdict {
                    VadVerdict::Voice => {
                        self.last_speech_at = Some(end_of_chunk);
                        self.silence_started_at = None;
                        self.speech_accumulated_ms += eval.voiced_ms();
                    }
                    VadVerdict::Silence | VadVerdict::WeakSignal => {
                        if self.silence_started_at.is_none() {
                            self.silence_started_at = Some(now);
                        }
                    }
                    // Neither extends speech nor starts the silence clock.
                    VadVerdict::Uncertain => {}
                }
                self.expire_silence_timers(end_of_chunk, &mut events);
            }
            EngineState::CandidateEnd => {
                self.buffer.extend_from_slice(chunk);
                if verdict == VadVerdict::Voice {
                    debug!("speech resumed during confirmation window");
                    self.state = EngineState::Listening;
                    self.listening_started_at = Some(now);
                    self.last_speech_at = Some(end_of_chunk);
                    self.silence_started_at = None;
                    self.speech_accumulated_ms += eval.voiced_ms();
                } else {
                    self.expire_silence_timers(end_of_chunk, &mut events);
                }
            }
            EngineState::WaitingIncomplete => {
                if verdict == VadVerdict::Voice {
                    debug!("continuation speech detected");
                    self.begin_turn(chunk, eval.voiced_ms(), now, end_of_chunk);
                }
            }
        }

        events
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Start a fresh turn buffer from this chunk.
    fn begin_turn(&mut self, chunk: &[u8], voiced_ms: u64, now: Instant, end_of_chunk: Instant) {
        self.state = EngineState::Listening;
        self.buffer.clear();
        self.buffer.extend_from_slice(chunk);
        self.speech_accumulated_ms = voiced_ms;
        self.listening_started_at = Some(now);
        self.last_speech_at = Some(end_of_chunk);
        self.silence_started_at = None;
        self.incomplete_started_at = None;
        self.idle_entered_at = None;
        self.cue_emitted_this_wait = false;
    }

    /// Advance the grace-window and confirmation-window timers at `at`.
    fn expire_silence_timers(&mut self, at: Instant, events: &mut Vec<TurnEvent>) {
        if self.state == EngineState::Listening {
            if let Some(started) = self.silence_started_at {
                if elapsed_ms(started, at) >= self.config.candidate_end_ms {
                    self.state = EngineState::CandidateEnd;
                    self.listening_started_at = None;
                }
            }
        }

        if self.state == EngineState::CandidateEnd {
            if let Some(started) = self.silence_started_at {
                let deadline = self.config.candidate_end_ms + self.config.final_end_ms;
                if elapsed_ms(started, at) >= deadline {
                    if self.speech_accumulated_ms >= self.config.min_speech_ms {
                        let audio = std::mem::take(&mut self.buffer);
                        debug!(
                            buffered_ms = pcm_duration_ms(audio.len()),
                            speech_ms = self.speech_accumulated_ms,
                            "turn end"
                        );
                        events.push(TurnEvent::TurnEnd { audio });
                    } else {
                        debug!(
                            speech_ms = self.speech_accumulated_ms,
                            "dropping noise-only turn"
                        );
                        self.buffer.clear();
                    }
                    self.reset_turn(at);
                }
            }
        }
    }

    /// Advance the continuation-cue and comfort timers at `at`.
    fn expire_incomplete_timers(&mut self, at: Instant, events: &mut Vec<TurnEvent>) {
        if self.state != EngineState::WaitingIncomplete {
            return;
        }
        let Some(started) = self.incomplete_started_at else {
            return;
        };
        let elapsed = elapsed_ms(started, at);
        if elapsed >= self.config.comfort_wait_ms {
            events.push(TurnEvent::Comfort);
            self.comfort_count += 1;
            self.reset_turn(at);
        } else if elapsed >= self.config.incomplete_wait_ms && !self.cue_emitted_this_wait {
            events.push(TurnEvent::ContinuationCue);
            self.continuation_count += 1;
            self.cue_emitted_this_wait = true;
        }
    }

    /// Advance the nudge timer at `at`.
    fn expire_nudge_timer(&mut self, at: Instant, events: &mut Vec<TurnEvent>) {
        if self.state != EngineState::Idle {
            return;
        }
        let Some(entered) = self.idle_entered_at else {
            return;
        };
        if elapsed_ms(entered, at) < self.config.nudge_ms {
            return;
        }
        if self.nudge_count < MAX_NUDGES {
            events.push(TurnEvent::Nudge);
            self.nudge_count += 1;
        }
        // Past the cap the expiry is suppressed; the base still advances so
        // the comparison does not stay trivially true.
        self.idle_entered_at = Some(at);
    }

    /// Reset turn state to Idle, restarting the nudge clock at `at`.
    fn reset_turn(&mut self, at: Instant) {
        self.state = EngineState::Idle;
        self.buffer.clear();
        self.speech_accumulated_ms = 0;
        self.listening_started_at = None;
        self.last_speech_at = None;
        self.silence_started_at = None;
        self.incomplete_started_at = None;
        self.idle_entered_at = Some(at);
        self.cue_emitted_this_wait = false;
    }
}

impl std::fmt::Debug for TurnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnEngine")
            .field("state", &self.state)
            .field("buffered_bytes", &self.buffer.len())
            .field("speech_accumulated_ms", &self.speech_accumulated_ms)
            .field("nudge_count", &self.nudge_count)
            .finish()
    }
}

/// Milliseconds from `start` to `at`, saturating to zero.
fn elapsed_ms(start: Instant, at: Instant) -> u64 {
    at.saturating_duration_since(start).as_millis() as u64
}
