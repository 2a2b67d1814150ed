//! Conversion between float seconds and `HH:MM:SS,mmm` timestamps.

use regex::Regex;
use std::sync::OnceLock;

fn timestamp_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| Regex::new(r"^(\d{2,}):(\d{2}):(\d{2}),(\d{3})$").expect("timestamp pattern is valid"))
}

/// Encode non-negative seconds as `HH:MM:SS,mmm`, zero-padded.
pub fn format_timestamp(seconds: f64) -> String {
	let total_ms = (seconds.max(0.0) * 1000.0).floor() as u64;
	let hours = total_ms / 3_600_000;
	let minutes = (total_ms % 3_600_000) / 60_000;
	let secs = (total_ms % 60_000) / 1000;
	let millis = total_ms % 1000;

	format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Decode a `HH:MM:SS,mmm` timestamp back to seconds.
///
/// An unparsable timestamp decodes to `0.0`: callers treat it as "start of
/// chunk", never as a hard error.
pub fn parse_timestamp(ts: &str) -> f64 {
	let Some(caps) = timestamp_pattern().captures(ts.trim()) else {
		return 0.0;
	};

	// Captures are all-digit by construction.
	let hours: f64 = caps[1].parse().unwrap_or(0.0);
	let minutes: f64 = caps[2].parse().unwrap_or(0.0);
	let secs: f64 = caps[3].parse().unwrap_or(0.0);
	let millis: f64 = caps[4].parse().unwrap_or(0.0);

	hours * 3600.0 + minutes * 60.0 + secs + millis / 1000.0
}

/// Shift a timestamp by a signed number of seconds, clamped at zero.
///
/// Used to translate chunk-local timestamps into job-global time.
pub fn shift_timestamp(ts: &str, delta_seconds: f64) -> String {
	let base_ms = (parse_timestamp(ts) * 1000.0).round() as i64;
	let delta_ms = (delta_seconds * 1000.0).round() as i64;
	let shifted_ms = (base_ms + delta_ms).max(0);

	format_timestamp(shifted_ms as f64 / 1000.0)
}
