// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Environment-driven configuration.
//!
//! Read once at startup into a plain settings struct. Unset or unparseable
//! numeric values fall back to the declared defaults.

use std::str::FromStr;

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind host for the HTTP/WebSocket server.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Seconds of inactivity before a session is marked idle.
    pub idle_timeout_secs: u64,
    /// Maximum session lifetime in seconds.
    pub max_session_duration_secs: u64,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    /// API key for the LLM backend.
    pub groq_api_key: String,
    /// API key for the transcription backend.
    pub openai_api_key: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", "127.0.0.1".to_string()),
            port: env_or("PORT", 8000),
            idle_timeout_secs: env_or("IDLE_TIMEOUT", 30),
            max_session_duration_secs: env_or("MAX_SESSION_DURATION", 600),
            redis_host: env_or("REDIS_HOST", "localhost".to_string()),
            redis_port: env_or("REDIS_PORT", 6379),
            redis_db: env_or("REDIS_DB", 0),
            groq_api_key: env_or("GROQ_API_KEY", String::new()),
            openai_api_key: env_or("OPENAI_API_KEY", String::new()),
            elevenlabs_api_key: env_or("ELEVENLABS_API_KEY", String::new()),
            elevenlabs_voice_id: env_or("ELEVENLABS_VOICE_ID", String::new()),
        }
    }
}

/// Read an environment variable, falling back to `default` when unset or
/// unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default_for_unset() {
        assert_eq!(env_or("PARLANCE_TEST_UNSET_VAR", 42u64), 42);
        assert_eq!(
            env_or("PARLANCE_TEST_UNSET_VAR", "fallback".to_string()),
            "fallback"
        );
    }

    #[test]
    fn test_env_or_parses_set_value() {
        std::env::set_var("PARLANCE_TEST_SET_VAR", "123");
        assert_eq!(env_or("PARLANCE_TEST_SET_VAR", 0u64), 123);
        std::env::remove_var("PARLANCE_TEST_SET_VAR");
    }

    #[test]
    fn test_env_or_default_for_unparseable() {
        std::env::set_var("PARLANCE_TEST_BAD_VAR", "not a number");
        assert_eq!(env_or("PARLANCE_TEST_BAD_VAR", 7u16), 7);
        std::env::remove_var("PARLANCE_TEST_BAD_VAR");
    }
}
