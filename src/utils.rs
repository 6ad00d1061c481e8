//! Shared utility functions used across the crate.

use rand::{distributions::Alphanumeric, Rng};
use std::time::Duration;

/// Parse a duration string (e.g., "30s", "500ms", "1m", "1h") into std::time::Duration.
///
/// Supported formats:
/// - `Nms` - milliseconds (e.g., "500ms")
/// - `Ns` - seconds (e.g., "30s")
/// - `Nm` - minutes (e.g., "5m")
/// - `Nh` - hours (e.g., "1h")
/// - Plain number - treated as milliseconds (e.g., "1000")
///
/// Returns `None` if the string cannot be parsed.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let secs_f64 = |v: &str, scale: f64| {
        v.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| Duration::from_secs_f64(n * scale))
    };
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs_f64(secs, 1.0)
    } else if let Some(mins) = s.strip_suffix('m') {
        secs_f64(mins, 60.0)
    } else if let Some(hours) = s.strip_suffix('h') {
        secs_f64(hours, 3600.0)
    } else {
        s.parse::<u64>().ok().map(Duration::from_millis)
    }
}

/// Random alphanumeric string, used for unique entity names.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
