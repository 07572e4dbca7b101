use chrono::{DateTime, TimeZone, Utc};

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn date_str(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%d").to_string()
}

/// Key for a captured snapshot.
/// e.g. "captures/webcam-0/captures/2026-10-18/20261018T093000000Z_000042_arm_angle.jpg"
pub fn capture_key(prefix: &str, camera_id: &str, captured_at_ms: i64, seq: u64, trigger: &str) -> String {
    format!(
        "{prefix}{camera_id}/captures/{date}/{ts}_{seq:06}_{trigger}.jpg",
        date = date_str(captured_at_ms),
        ts = fmt_ts(captured_at_ms),
    )
}
