//! External media tooling: duration probing, silence detection, and chunk
//! extraction, all behind one trait so tests run without `ffmpeg` installed.
//!
//! Every spawned process is reported to the [`CancellationRegistry`] under
//! the job id, so a hard cancel can reach tools stuck in a long call.

use crate::error::ChunkError;
use crate::registry::CancellationRegistry;
use crate::segment::SilenceInterval;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[async_trait]
pub trait MediaToolkit: Send + Sync {
	/// Total audio duration in whole seconds; `0` means unknown and is never
	/// an error.
	async fn probe_duration(&self, job_id: &str, path: &Path) -> u32;

	/// Detected near-silence spans. Any failure reports an empty list, which
	/// callers treat as "fall back to fixed-length segmenting".
	async fn detect_silence(&self, job_id: &str, path: &Path, noise_db: f64, min_silence_secs: f64) -> Vec<SilenceInterval>;

	/// Write the `[start, end)` range of `input` to `output`. Deterministic
	/// given identical inputs.
	async fn extract_range(&self, job_id: &str, input: &Path, output: &Path, start: f64, end: f64) -> Result<(), ChunkError>;
}

fn silence_start_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| Regex::new(r"silence_start:\s*([0-9]+\.?[0-9]*)").expect("silence_start pattern is valid"))
}

fn silence_end_pattern() -> &'static Regex {
	static PATTERN: OnceLock<Regex> = OnceLock::new();
	PATTERN.get_or_init(|| Regex::new(r"silence_end:\s*([0-9]+\.?[0-9]*)").expect("silence_end pattern is valid"))
}

/// `ffprobe`/`ffmpeg` backed toolkit.
#[derive(Clone)]
pub struct FfmpegToolkit {
	registry: CancellationRegistry,
	probe_timeout: Duration,
}

impl FfmpegToolkit {
	pub fn new(registry: CancellationRegistry, probe_timeout: Duration) -> Self {
		Self { registry, probe_timeout }
	}

	fn track(&self, job_id: &str, child: &Child) {
		if let Some(pid) = child.id() {
			self.registry.track_pid(job_id, pid as i32);
		}
	}
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
	async fn probe_duration(&self, job_id: &str, path: &Path) -> u32 {
		let mut command = Command::new("ffprobe");
		command
			.args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
			.arg(path)
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		let child = match command.spawn() {
			Ok(child) => child,
			Err(e) => {
				warn!(job_id, error = %e, "ffprobe failed to spawn, duration unknown");
				return 0;
			}
		};
		self.track(job_id, &child);

		let output = match tokio::time::timeout(self.probe_timeout, child.wait_with_output()).await {
			Ok(Ok(output)) if output.status.success() => output,
			Ok(Ok(output)) => {
				warn!(job_id, status = %output.status, "ffprobe exited non-zero, duration unknown");
				return 0;
			}
			Ok(Err(e)) => {
				warn!(job_id, error = %e, "ffprobe failed, duration unknown");
				return 0;
			}
			Err(_) => {
				warn!(job_id, timeout_secs = self.probe_timeout.as_secs(), "ffprobe timed out, duration unknown");
				return 0;
			}
		};

		let duration = String::from_utf8_lossy(&output.stdout).trim().parse::<f64>().unwrap_or(0.0);
		debug!(job_id, duration, "probed source duration");

		duration.max(0.0) as u32
	}

	async fn detect_silence(&self, job_id: &str, path: &Path, noise_db: f64, min_silence_secs: f64) -> Vec<SilenceInterval> {
		let filter = format!("silencedetect=noise={noise_db}dB:d={min_silence_secs}");
		let mut command = Command::new("ffmpeg");
		command
			.arg("-i")
			.arg(path)
			.args(["-af", &filter, "-f", "null", "-"])
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let child = match command.spawn() {
			Ok(child) => child,
			Err(e) => {
				warn!(job_id, error = %e, "silence detection unavailable, using fixed splits");
				return Vec::new();
			}
		};
		self.track(job_id, &child);

		let output = match child.wait_with_output().await {
			Ok(output) if output.status.success() => output,
			Ok(output) => {
				warn!(job_id, status = %output.status, "silence detection exited non-zero, using fixed splits");
				return Vec::new();
			}
			Err(e) => {
				warn!(job_id, error = %e, "silence detection failed, using fixed splits");
				return Vec::new();
			}
		};

		// silencedetect reports on stderr, one marker per line.
		let stderr = String::from_utf8_lossy(&output.stderr);
		let intervals = parse_silence_markers(&stderr);
		debug!(job_id, count = intervals.len(), "detected silence intervals");

		intervals
	}

	async fn extract_range(&self, job_id: &str, input: &Path, output: &Path, start: f64, end: f64) -> Result<(), ChunkError> {
		let mut command = Command::new("ffmpeg");
		command
			.args(["-y", "-hide_banner", "-loglevel", "error"])
			.arg("-i")
			.arg(input)
			.args(["-ss", &format!("{start:.3}"), "-to", &format!("{end:.3}"), "-vn", "-acodec", "copy"])
			.arg(output)
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let child = command.spawn().map_err(|e| ChunkError::Extraction(format!("ffmpeg failed to spawn: {e}")))?;
		self.track(job_id, &child);

		let result = child.wait_with_output().await.map_err(|e| ChunkError::Extraction(e.to_string()))?;
		if !result.status.success() {
			let stderr = String::from_utf8_lossy(&result.stderr);
			return Err(ChunkError::Extraction(format!("ffmpeg exited {}: {}", result.status, stderr.trim())));
		}

		debug!(job_id, start, end, output = %output.display(), "extracted chunk audio");
		Ok(())
	}
}

/// Pair `silence_start`/`silence_end` markers from silencedetect output.
/// A trailing start with no end (silence running into EOF) is dropped.
fn parse_silence_markers(stderr: &str) -> Vec<SilenceInterval> {
	let mut intervals = Vec::new();
	let mut pending_start: Option<f64> = None;

	for line in stderr.lines() {
		if let Some(caps) = silence_start_pattern().captures(line) {
			pending_start = caps[1].parse().ok();
		} else if let Some(caps) = silence_end_pattern().captures(line) {
			if let (Some(start), Ok(end)) = (pending_start.take(), caps[1].parse::<f64>()) {
				if end > start {
					intervals.push((start, end));
				}
			}
		}
	}

	intervals
}
