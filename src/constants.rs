use rand::Rng;

/// Expected database schema version
/// All databases must use this version for compatibility
pub const EXPECTED_DB_VERSION: &str = "1";

/// Extensions accepted by batch ingestion (lowercase, without dot)
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "spx"];

/// Value the API documentation tooling pre-fills into empty text fields.
/// Treated the same as an empty string.
pub const PLACEHOLDER_TEXT: &str = "string";

/// Default lower bound for a VAD clip, in seconds
pub const DEFAULT_MIN_CLIP_SECONDS: u32 = 1;

/// Default upper bound for a VAD clip, in seconds
pub const DEFAULT_MAX_CLIP_SECONDS: u32 = 20;

/// Default page size for segment and transcript listings
pub const DEFAULT_PAGE_LIMIT: u64 = 100;

/// Generate a unique database ID
pub fn generate_db_unique_id() -> String {
    format!(
        "db_{}",
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(12)
            .map(char::from)
            .collect::<String>()
    )
}

/// Current wall-clock time in milliseconds since the epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_format() {
        let id = generate_db_unique_id();
        assert!(id.starts_with("db_"));
        assert_eq!(id.len(), 15);
        assert_ne!(id, generate_db_unique_id());
    }
}
