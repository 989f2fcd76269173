// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Parlance server binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parlance::config::Settings;
use parlance::conversation::ConversationEngine;
use parlance::server::{create_router, shutdown_signal, spawn_session_cleanup, AppState};
use parlance::services::elevenlabs::ElevenLabsTtsService;
use parlance::services::groq::GroqLlmService;
use parlance::services::whisper::WhisperAsrService;
use parlance::services::{LlmService, SttService, TtsService};
use parlance::session::{MemoryStore, RedisStore, SessionManager, SessionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlance=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    info!("starting parlance server");

    // Store: Redis in production, in-process fallback when unreachable.
    let store: Arc<dyn SessionStore> = match RedisStore::connect(
        &settings.redis_host,
        settings.redis_port,
        settings.redis_db,
    )
    .await
    {
        Ok(store) => {
            info!(
                "connected to redis at {}:{}",
                settings.redis_host, settings.redis_port
            );
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                "redis unavailable ({}), falling back to in-process session store",
                e
            );
            Arc::new(MemoryStore::new())
        }
    };

    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Duration::from_secs(settings.idle_timeout_secs),
        Duration::from_secs(settings.max_session_duration_secs),
    ));

    let llm: Arc<dyn LlmService> =
        Arc::new(GroqLlmService::new(settings.groq_api_key.clone(), ""));
    let stt: Arc<dyn SttService> =
        Arc::new(WhisperAsrService::new(settings.openai_api_key.clone()));
    let tts: Arc<dyn TtsService> = Arc::new(ElevenLabsTtsService::new(
        settings.elevenlabs_api_key.clone(),
        settings.elevenlabs_voice_id.clone(),
    ));

    let conversation = Arc::new(
        ConversationEngine::new(Arc::clone(&store), llm)
            .with_key_ttl(settings.max_session_duration_secs as i64 + 60),
    );

    let cleanup = spawn_session_cleanup(Arc::clone(&sessions));

    let state = AppState {
        sessions,
        conversation,
        stt,
        tts,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    info!("server stopped");
    Ok(())
}
