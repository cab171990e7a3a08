//! Text and time helpers shared by config parsing, the HTTP client, and timers.

use std::time::Duration;

/// Trimmed text, or `None` when nothing is left.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Leading 180 characters of a response body, for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds as a signed offset for Unix-ms arithmetic.
pub fn signed_ms(duration: Duration) -> i64 {
    i64::try_from(duration_ms(duration)).unwrap_or(i64::MAX)
}

/// Unix ms `delay` after `now`.
pub fn due_at(now: i64, delay: Duration) -> i64 {
    now.saturating_add(signed_ms(delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_option_trims_or_drops() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn test_is_http_url_checks_scheme() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("https://api.example.com"));
        assert!(!is_http_url("ws://example.com"));
        assert!(!is_http_url("api.example.com"));
    }

    #[test]
    fn test_compact_text_keeps_first_180_chars() {
        let long = format!("  {}", "x".repeat(500));
        assert_eq!(compact_text(&long).len(), 180);
    }

    #[test]
    fn test_due_at_saturates() {
        assert_eq!(due_at(1_000, Duration::from_secs(5)), 6_000);
        assert_eq!(due_at(i64::MAX - 1, Duration::from_secs(1)), i64::MAX);
        assert_eq!(signed_ms(Duration::MAX), i64::MAX);
    }
}
