// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The per-session actor behind `WS /ws/voice/{session_id}`.
//!
//! Each connection runs one logically sequential actor: binary frames carry
//! PCM audio into the VAD/turn-taking stack, JSON text frames carry control
//! messages, and a dedicated writer task drains the outbound queue. Turn
//! processing (ASR -> dialogue -> LLM -> TTS) runs on a spawned task that
//! reports back over a channel, so inbound audio keeps draining and barge-in
//! stays responsive while adapters are in flight. While a turn task is
//! outstanding the engine is disarmed and chunks are not accumulated.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::pcm_duration_ms;
use crate::audio::utils::calculate_rms;
use crate::audio::vad::evaluator::default_evaluator;
use crate::conversation::engine::ConversationError;
use crate::conversation::DialogState;
use crate::server::AppState;
use crate::services::{retry_once, Transcription};
use crate::transport::{ClientMessage, ServerMessage};
use crate::turn::{BargeInDetector, TurnEngine, TurnEvent};

/// Result of one spawned turn-processing task.
struct TurnReport {
    messages: Vec<ServerMessage>,
    /// Total playback seconds of any dispatched audio.
    bot_audio_secs: Option<f64>,
    /// Enter the incomplete wait instead of re-arming for a fresh turn.
    wait_incomplete: bool,
    should_end: bool,
}

impl TurnReport {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            bot_audio_secs: None,
            wait_incomplete: false,
            should_end: false,
        }
    }
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: the actor never blocks on the socket sink.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx
                .send(Message::Text(message.to_json()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    if let Err(e) = run_session(&state, &session_id, &out_tx, &mut ws_rx).await {
        warn!(session_id = %session_id, "session actor failed: {}", e);
        let _ = out_tx.send(ServerMessage::error("internal_error", e.to_string()));
    }

    drop(out_tx);
    let _ = writer.await;
    debug!(session_id = %session_id, "voice channel closed");
}

async fn run_session(
    state: &AppState,
    session_id: &str,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<(), ConversationError> {
    if state.sessions.get_session(session_id).await?.is_none() {
        let _ = out_tx.send(ServerMessage::error(
            "invalid_session",
            "Unknown or expired session",
        ));
        return Ok(());
    }
    state.sessions.update_activity(session_id).await?;
    if state.conversation.get_state(session_id).await?.is_none() {
        state.conversation.initialize(session_id).await?;
    }

    let turn_config = state
        .sessions
        .get_turn_config(session_id)
        .await?
        .unwrap_or_default();
    info!(session_id = %session_id, ?turn_config, "voice channel open");

    let mut engine = TurnEngine::new(turn_config, default_evaluator());
    let mut barge_in = BargeInDetector::new(default_evaluator());

    let mut bot_speaking = false;
    let mut bot_until: Option<Instant> = None;
    let mut processing = false;
    let mut should_close = false;
    let mut last_activity_touch = Instant::now();

    let cancel = CancellationToken::new();
    let (report_tx, mut report_rx) = mpsc::channel::<TurnReport>(4);

    // Greet on first connection, then arm the engine.
    if state.conversation.get_state(session_id).await? == Some(DialogState::Init) {
        let (greet_state, greeting, _) =
            state.conversation.process_turn_transition(session_id, None).await?;
        match retry_once("tts", || state.tts.synthesize(&greeting)).await {
            Ok(audio) => {
                let _ = out_tx.send(ServerMessage::response(
                    greeting.clone(),
                    &audio.audio,
                    greet_state.as_str(),
                    false,
                ));
                bot_speaking = true;
                bot_until = Some(Instant::now() + Duration::from_secs_f64(audio.duration_secs));
            }
            Err(e) => {
                warn!(session_id = %session_id, "greeting synthesis failed: {}", e);
                let _ = out_tx.send(ServerMessage::response(
                    greeting.clone(),
                    b"",
                    greet_state.as_str(),
                    false,
                ));
            }
        }
        state.conversation.process_turn_transition(session_id, None).await?;
    }
    engine.arm(Instant::now());
    let mut armed = true;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(report) = report_rx.recv() => {
                processing = false;
                let now = Instant::now();
                for message in report.messages {
                    let _ = out_tx.send(message);
                }
                if let Some(secs) = report.bot_audio_secs {
                    bot_speaking = true;
                    bot_until = Some(now + Duration::from_secs_f64(secs));
                    barge_in.reset();
                }
                if report.should_end {
                    should_close = true;
                    break;
                }
                if report.wait_incomplete {
                    engine.wait_for_continuation(now);
                } else {
                    engine.finalize_turn(now);
                }
                armed = true;
            }

            _ = ticker.tick() => {
                let now = Instant::now();
                if expire_bot_playback(&mut bot_speaking, &mut bot_until, &mut barge_in, &mut engine, now) {
                    continue;
                }
                if armed && !processing && !bot_speaking {
                    let events = engine.tick(now);
                    handle_turn_events(
                        events, state, session_id, out_tx, &report_tx, &cancel,
                        &mut armed, &mut processing,
                    )
                    .await?;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                let _ = out_tx.send(ServerMessage::Pong);
                            }
                            Ok(ClientMessage::End) => {
                                should_close = true;
                                break;
                            }
                            // Unparseable control messages are ignored.
                            Err(_) => {}
                        }
                    }
                    Some(Ok(Message::Binary(chunk))) => {
                        let now = Instant::now();
                        if chunk.is_empty() || chunk.len() % 2 != 0 {
                            debug!(session_id = %session_id, len = chunk.len(), "discarding malformed chunk");
                            continue;
                        }
                        if now.duration_since(last_activity_touch) >= Duration::from_secs(1) {
                            state.sessions.update_activity(session_id).await?;
                            last_activity_touch = now;
                        }

                        expire_bot_playback(&mut bot_speaking, &mut bot_until, &mut barge_in, &mut engine, now);
                        if bot_speaking {
                            if barge_in.process_chunk(&chunk) {
                                bot_speaking = false;
                                bot_until = None;
                                engine.reset_idle_timer(now);
                                let _ = out_tx.send(ServerMessage::BargeIn);
                                // The same chunk falls through to the engine
                                // and opens the interrupting turn.
                            }
                        }
                        if !bot_speaking && armed && !processing {
                            let events = engine.process_chunk(&chunk, now);
                            handle_turn_events(
                                events, state, session_id, out_tx, &report_tx, &cancel,
                                &mut armed, &mut processing,
                            )
                            .await?;
                        }
                    }
                    // Protocol-level ping/pong is handled by the socket layer.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    cancel.cancel();
    if should_close {
        state.sessions.close_session(session_id).await?;
    }
    Ok(())
}

/// Clear the bot-speaking flag once the playback deadline passes.
///
/// Returns `true` when playback just expired, so tick processing can skip
/// the same instant.
fn expire_bot_playback(
    bot_speaking: &mut bool,
    bot_until: &mut Option<Instant>,
    barge_in: &mut BargeInDetector,
    engine: &mut TurnEngine,
    now: Instant,
) -> bool {
    if *bot_speaking {
        if let Some(until) = *bot_until {
            if now >= until {
                *bot_speaking = false;
                *bot_until = None;
                barge_in.reset();
                engine.reset_idle_timer(now);
                return true;
            }
        }
    }
    false
}

/// Dispatch events emitted by the turn engine.
#[allow(clippy::too_many_arguments)]
async fn handle_turn_events(
    events: Vec<TurnEvent>,
    state: &AppState,
    session_id: &str,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    report_tx: &mpsc::Sender<TurnReport>,
    cancel: &CancellationToken,
    armed: &mut bool,
    processing: &mut bool,
) -> Result<(), ConversationError> {
    for event in events {
        match event {
            TurnEvent::Nudge => {
                state.conversation.increment_silence_prompt(session_id).await?;
                let _ = out_tx.send(ServerMessage::Nudge {
                    text: state.conversation.nudge_message().to_string(),
                });
            }
            TurnEvent::ContinuationCue => {
                let _ = out_tx.send(ServerMessage::ContinuationCue {
                    text: state.conversation.continuation_cue().to_string(),
                });
            }
            TurnEvent::Comfort => {
                let _ = out_tx.send(ServerMessage::Comfort {
                    text: state.conversation.comfort_message().to_string(),
                });
            }
            TurnEvent::TurnEnd { audio } => {
                *armed = false;
                *processing = true;
                spawn_turn_task(
                    state.clone(),
                    session_id.to_string(),
                    audio,
                    report_tx.clone(),
                    cancel.child_token(),
                );
            }
        }
    }
    Ok(())
}

/// Run turn processing off the actor's critical section.
fn spawn_turn_task(
    state: AppState,
    session_id: String,
    audio: Vec<u8>,
    report_tx: mpsc::Sender<TurnReport>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "turn task cancelled");
            }
            report = run_turn(&state, &session_id, audio) => {
                let _ = report_tx.send(report).await;
            }
        }
    });
}

/// The full turn pipeline: ASR -> routing/completeness -> dialogue -> LLM ->
/// TTS. Never panics; failures become report contents.
async fn run_turn(state: &AppState, session_id: &str, audio: Vec<u8>) -> TurnReport {
    let mut report = TurnReport::new();

    debug!(
        session_id = %session_id,
        duration_ms = pcm_duration_ms(audio.len()),
        rms = calculate_rms(&audio),
        "transcribing captured turn"
    );

    if let Err(e) = state.conversation.begin_processing(session_id).await {
        return fail_report(state, session_id, e.into()).await;
    }

    let transcription = match retry_once("asr", || state.stt.transcribe(&audio)).await {
        Ok(t) => t,
        Err(e) => {
            warn!(session_id = %session_id, "transcription failed twice: {}", e);
            let _ = state
                .conversation
                .update_state(session_id, DialogState::Listening)
                .await;
            push_spoken_response(
                state,
                &mut report,
                state.conversation.recovery_message(),
                DialogState::Listening.as_str(),
                false,
            )
            .await;
            return report;
        }
    };

    // Merge in the prefix of a preceding incomplete turn.
    let prefix = match state.conversation.take_pending_prefix(session_id).await {
        Ok(p) => p,
        Err(e) => return fail_report(state, session_id, e).await,
    };
    let merged = Transcription {
        text: format!("{}{}", prefix, transcription.text),
        confidence: transcription.confidence,
        language: transcription.language.clone(),
    };

    let action = state.conversation.route(&merged);
    if !transcription.is_empty() {
        report.messages.push(ServerMessage::Transcription {
            text: transcription.text.clone(),
            confidence: transcription.confidence,
            language: transcription.language.clone(),
            action: action.as_str().to_string(),
        });
    }

    // Completeness gate. Arbitration is allowed only for input that will be
    // accepted, so rejected garbage never costs an LLM call.
    if !merged.is_empty()
        && !state
            .conversation
            .check_completeness(&merged.text, action.is_accept())
            .await
    {
        debug!(session_id = %session_id, "incomplete utterance, waiting for continuation");
        let prefix = format!("{} ", merged.text.trim_end());
        if let Err(e) = state.conversation.set_pending_prefix(session_id, &prefix).await {
            return fail_report(state, session_id, e).await;
        }
        if let Err(e) = state
            .conversation
            .update_state(session_id, DialogState::Listening)
            .await
        {
            return fail_report(state, session_id, e).await;
        }
        report.wait_incomplete = true;
        return report;
    }

    let outcome = match state.conversation.process_transcription(session_id, &merged).await {
        Ok(outcome) => outcome,
        Err(e) => return fail_report(state, session_id, e).await,
    };

    if !outcome.response.is_empty() {
        // Canned response: clarification, silence prompt, goodbye, escalation.
        push_spoken_response(
            state,
            &mut report,
            &outcome.response,
            outcome.state.as_str(),
            outcome.should_end,
        )
        .await;
        report.should_end = outcome.should_end;
        return report;
    }

    if outcome.state != DialogState::Responding {
        return report;
    }

    // Accepted input: generate the reply over the stored history.
    let history = state
        .sessions
        .get_history(session_id, 2 * state.conversation.max_turns() as usize)
        .await
        .unwrap_or_default();
    let reply = match retry_once("llm", || state.conversation.generate_reply(&history, &merged.text))
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(session_id = %session_id, "reply generation failed twice: {}", e);
            let _ = state
                .conversation
                .update_state(session_id, DialogState::Listening)
                .await;
            push_spoken_response(
                state,
                &mut report,
                state.conversation.recovery_message(),
                DialogState::Listening.as_str(),
                false,
            )
            .await;
            return report;
        }
    };

    if let Err(e) = state.sessions.add_to_history(session_id, "user", &merged.text).await {
        return fail_report(state, session_id, e.into()).await;
    }
    if let Err(e) = state.sessions.add_to_history(session_id, "assistant", &reply).await {
        return fail_report(state, session_id, e.into()).await;
    }

    push_spoken_response(state, &mut report, &reply, outcome.state.as_str(), false).await;

    // RESPONDING -> LISTENING, or END once the turn cap is reached.
    let (post_state, farewell, should_end) =
        match state.conversation.process_turn_transition(session_id, None).await {
            Ok(v) => v,
            Err(e) => return fail_report(state, session_id, e).await,
        };
    if should_end && !farewell.is_empty() {
        push_spoken_response(state, &mut report, &farewell, post_state.as_str(), true).await;
    }
    report.should_end = should_end;
    report
}

/// Synthesize and queue a spoken response, falling back to text-only when
/// synthesis fails twice.
async fn push_spoken_response(
    state: &AppState,
    report: &mut TurnReport,
    text: &str,
    conversation_state: &str,
    should_end: bool,
) {
    match retry_once("tts", || state.tts.synthesize(text)).await {
        Ok(audio) => {
            report.bot_audio_secs =
                Some(report.bot_audio_secs.unwrap_or(0.0) + audio.duration_secs);
            report.messages.push(ServerMessage::response(
                text,
                &audio.audio,
                conversation_state,
                should_end,
            ));
        }
        Err(e) => {
            warn!("speech synthesis failed twice, sending text only: {}", e);
            report.messages.push(ServerMessage::response(
                text,
                b"",
                conversation_state,
                should_end,
            ));
        }
    }
}

/// Session state drifted or the store failed: emit a fatal error and end.
async fn fail_report(state: &AppState, session_id: &str, error: ConversationError) -> TurnReport {
    warn!(session_id = %session_id, "fatal session error: {}", error);
    let _ = state
        .conversation
        .update_state(session_id, DialogState::Error)
        .await;
    let _ = state
        .conversation
        .update_state(session_id, DialogState::End)
        .await;
    TurnReport {
        messages: vec![ServerMessage::error("session_state", error.to_string())],
        bot_audio_secs: None,
        wait_incomplete: false,
        should_end: true,
    }
}
