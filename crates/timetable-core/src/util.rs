//! Small helpers shared by config, models and the HTTP transport.

/// Longest relay response body kept in an error message.
pub const ERROR_BODY_LIMIT: usize = 180;

/// Trimmed text, or `None` for missing and blank values.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether `value` is an absolute http(s) URL with a non-empty host part.
pub fn is_http_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    ["http://", "https://"].iter().any(|scheme| {
        lower
            .strip_prefix(scheme)
            .is_some_and(|rest| !rest.trim_start_matches('/').is_empty())
    })
}

/// Relay response body shortened for logs and `syncError` columns.
pub fn compact_text(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut shortened: String = trimmed.chars().take(ERROR_BODY_LIMIT - 3).collect();
    shortened.push_str("...");
    shortened
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
