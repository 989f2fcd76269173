// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared utility functions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Return the current wall-clock time as whole seconds since the Unix epoch.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Generate a unique ID string with an optional prefix.
///
/// Uses a monotonic counter combined with a timestamp to produce
/// collision-resistant IDs without requiring the `uuid` crate.
pub fn generate_unique_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{}-{}", prefix, ts, count)
}

/// Encode bytes to base64 using the standard alphabet.
pub fn encode_base64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode a base64 string to bytes using the standard alphabet.
///
/// Returns `None` if the input is not valid base64.
pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_id_has_prefix() {
        let id = generate_unique_id("sess");
        assert!(id.starts_with("sess-"));
    }

    #[test]
    fn test_generate_unique_id_unique() {
        let id1 = generate_unique_id("a");
        let id2 = generate_unique_id("a");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_now_epoch_secs_is_recent() {
        // 2024-01-01T00:00:00Z.
        assert!(now_epoch_secs() > 1_704_067_200);
    }

    #[test]
    fn test_base64_roundtrip() {
        let original = b"pcm bytes";
        let encoded = encode_base64(original);
        let decoded = decode_base64(&encoded).expect("decode should succeed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(decode_base64("not valid base64!!!").is_none());
    }
}
