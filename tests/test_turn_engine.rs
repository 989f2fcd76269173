// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end scenarios for the turn-taking engine and barge-in detector,
//! driven with synthetic PCM and explicit timestamps.

use std::time::{Duration, Instant};

use parlance::audio::pcm_duration_ms;
use parlance::audio::vad::evaluator::VadEvaluator;
use parlance::turn::{BargeInDetector, EngineState, TurnConfig, TurnEngine, TurnEvent};

/// PCM16 square wave loud enough for the energy gate's Voice verdict.
fn voice_chunk(ms: u64) -> Vec<u8> {
    let samples = (ms as usize) * 16;
    let mut bytes = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let s: i16 = if i % 2 == 0 { 5000 } else { -5000 };
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Low-level hiss below every energy threshold.
fn noise_chunk(ms: u64) -> Vec<u8> {
    let samples = (ms as usize) * 16;
    let mut bytes = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let s: i16 = if i % 2 == 0 { 40 } else { -40 };
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

fn silence_chunk(ms: u64) -> Vec<u8> {
    vec![0u8; (ms as usize) * 32]
}

fn engine() -> TurnEngine {
    TurnEngine::new(TurnConfig::default(), VadEvaluator::new())
}

/// Drive the engine the way the session actor does: a 100 ms tick grid with
/// 200 ms chunks arriving on even steps. Returns `(event, at_ms)` pairs.
fn drive(
    engine: &mut TurnEngine,
    base: Instant,
    until_ms: u64,
    chunk_for: impl Fn(u64) -> Option<Vec<u8>>,
) -> Vec<(TurnEvent, u64)> {
    let mut emitted = Vec::new();
    let mut t = 100;
    while t <= until_ms {
        let now = base + Duration::from_millis(t);
        for event in engine.tick(now) {
            emitted.push((event, t));
        }
        if t % 200 == 0 {
            if let Some(chunk) = chunk_for(t) {
                for event in engine.process_chunk(&chunk, now) {
                    emitted.push((event, t));
                }
            }
        }
        t += 100;
    }
    emitted
}

// ---------------------------------------------------------------------------
// Clean single turn
// ---------------------------------------------------------------------------

#[test]
fn test_clean_single_turn() {
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);

    // Speech covers [0, 1200); silence afterwards. Chunks arrive at their
    // start times, so speech chunks arrive at 0, 200, ..., 1000.
    for events in [
        e.process_chunk(&voice_chunk(200), base),
        e.process_chunk(&voice_chunk(200), base + Duration::from_millis(200)),
        e.process_chunk(&voice_chunk(200), base + Duration::from_millis(400)),
        e.process_chunk(&voice_chunk(200), base + Duration::from_millis(600)),
        e.process_chunk(&voice_chunk(200), base + Duration::from_millis(800)),
        e.process_chunk(&voice_chunk(200), base + Duration::from_millis(1000)),
    ] {
        assert!(events.is_empty());
    }
    assert_eq!(e.state(), EngineState::Listening);
    assert_eq!(e.speech_accumulated_ms(), 1200);

    let emitted = drive(&mut e, base, 4000, |t| {
        (1200..2800).contains(&t).then(|| silence_chunk(200))
    });

    let turn_ends: Vec<_> = emitted
        .iter()
        .filter(|(ev, _)| matches!(ev, TurnEvent::TurnEnd { .. }))
        .collect();
    assert_eq!(turn_ends.len(), 1);
    let (TurnEvent::TurnEnd { audio }, at_ms) = turn_ends[0] else {
        unreachable!();
    };
    // Silence began at 1200; the end confirms 1400 ms later.
    assert_eq!(*at_ms, 2600);
    assert_eq!(pcm_duration_ms(audio.len()), 2600);
}

// ---------------------------------------------------------------------------
// Noise-only input: the nudge ladder
// ---------------------------------------------------------------------------

#[test]
fn test_noise_only_nudges_three_times() {
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);

    let emitted = drive(&mut e, base, 10_000, |_| Some(noise_chunk(200)));

    let nudges: Vec<u64> = emitted
        .iter()
        .filter(|(ev, _)| matches!(ev, TurnEvent::Nudge))
        .map(|(_, at)| *at)
        .collect();
    assert_eq!(nudges, vec![1500, 3000, 4500]);
    assert!(emitted
        .iter()
        .all(|(ev, _)| matches!(ev, TurnEvent::Nudge)));
    assert_eq!(e.nudge_count(), 3);
}

#[test]
fn test_nudges_at_least_nudge_ms_apart() {
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);

    let emitted = drive(&mut e, base, 20_000, |_| Some(silence_chunk(200)));
    let nudges: Vec<u64> = emitted
        .iter()
        .filter(|(ev, _)| matches!(ev, TurnEvent::Nudge))
        .map(|(_, at)| *at)
        .collect();
    assert!(nudges.len() <= 3);
    for pair in nudges.windows(2) {
        assert!(pair[1] - pair[0] >= 1500);
    }
}

// ---------------------------------------------------------------------------
// Barge-in
// ---------------------------------------------------------------------------

#[test]
fn test_barge_in_preempts_and_opens_turn() {
    let mut detector = BargeInDetector::new(VadEvaluator::new());
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);

    // Bot has been speaking since t=0; the user is quiet for a second.
    for _ in 0..5 {
        let chunk = silence_chunk(200);
        assert!(!detector.process_chunk(&chunk));
    }

    // At t=1.0 s the user produces 40 ms of continuous voice inside a chunk.
    let mut interrupting = voice_chunk(40);
    interrupting.extend_from_slice(&silence_chunk(160));
    let now = base + Duration::from_millis(1000);
    assert!(detector.process_chunk(&interrupting));

    // The actor then lets the engine process the same chunk normally.
    let events = e.process_chunk(&interrupting, now);
    assert!(events.is_empty());
    assert_eq!(e.state(), EngineState::Listening);

    // Subsequent chunks accumulate into the new turn.
    e.process_chunk(&voice_chunk(200), base + Duration::from_millis(1200));
    assert_eq!(pcm_duration_ms(e.buffered_bytes()), 400);
}

#[test]
fn test_single_voiced_frame_does_not_barge_in() {
    let mut detector = BargeInDetector::new(VadEvaluator::new());

    // Alternating one voiced frame and one silent frame never reaches two in
    // a row.
    for _ in 0..50 {
        let mut chunk = voice_chunk(20);
        chunk.extend_from_slice(&silence_chunk(20));
        assert!(!detector.process_chunk(&chunk));
    }
}

// ---------------------------------------------------------------------------
// Incomplete wait driven on the tick grid
// ---------------------------------------------------------------------------

#[test]
fn test_incomplete_wait_cue_then_comfort_then_idle() {
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);
    e.wait_for_continuation(base);

    let emitted = drive(&mut e, base, 2800, |_| Some(silence_chunk(200)));

    let kinds: Vec<&TurnEvent> = emitted.iter().map(|(ev, _)| ev).collect();
    assert_eq!(kinds, vec![&TurnEvent::ContinuationCue, &TurnEvent::Comfort]);
    assert_eq!(emitted[0].1, 300);
    assert_eq!(emitted[1].1, 1500);
    assert_eq!(e.state(), EngineState::Idle);
}

#[test]
fn test_continuation_speech_cancels_comfort() {
    let mut e = engine();
    let base = Instant::now();
    e.arm(base);
    e.wait_for_continuation(base);

    // The user resumes 500 ms in, after the cue but before the comfort.
    let mut emitted = Vec::new();
    for t in [100u64, 200, 300, 400] {
        emitted.extend(e.tick(base + Duration::from_millis(t)));
    }
    emitted.extend(e.process_chunk(&voice_chunk(200), base + Duration::from_millis(500)));

    assert_eq!(emitted, vec![TurnEvent::ContinuationCue]);
    assert_eq!(e.state(), EngineState::Listening);
    // Only the continuation audio is buffered.
    assert_eq!(pcm_duration_ms(e.buffered_bytes()), 200);
}

// ---------------------------------------------------------------------------
// Custom timing configuration
// ---------------------------------------------------------------------------

#[test]
fn test_custom_timing_shifts_turn_end() {
    let config = TurnConfig {
        candidate_end_ms: 400,
        final_end_ms: 200,
        min_speech_ms: 100,
        ..TurnConfig::default()
    };
    let mut e = TurnEngine::new(config, VadEvaluator::new());
    let base = Instant::now();
    e.arm(base);

    e.process_chunk(&voice_chunk(200), base);
    let emitted = drive(&mut e, base, 2000, |t| {
        (200..1000).contains(&t).then(|| silence_chunk(200))
    });

    let turn_ends: Vec<u64> = emitted
        .iter()
        .filter(|(ev, _)| matches!(ev, TurnEvent::TurnEnd { .. }))
        .map(|(_, at)| *at)
        .collect();
    // Silence from 200 ms; 400 + 200 ms later the turn confirms at 800 ms.
    assert_eq!(turn_ends, vec![800]);
}
