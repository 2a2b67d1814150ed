use serde::Deserialize;
use std::time::Duration;

/// Hardware class the inference engine runs on. Determines how generous the
/// per-job processing deadline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
	/// GPU or other accelerator backing the engine.
	Accelerated,
	/// CPU-only inference.
	#[default]
	Unaccelerated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
	/// Service-wide ceiling on whole jobs running at once.
	pub max_parallel_jobs: usize,
	/// Per-job ceiling on chunks transcribing at once.
	pub chunk_workers: usize,
	/// Target chunk length in seconds.
	pub chunk_secs: f64,
	/// Deliberate redundancy pulled into every chunk after the first.
	pub overlap_secs: f64,
	/// How far (±seconds) around a target cut the segmenter searches for a
	/// silence interval to snap to.
	pub silence_search_window_secs: f64,
	/// Noise ceiling in dB for the silence detector.
	pub silence_noise_db: f64,
	/// Minimum length in seconds for a span to count as silence.
	pub min_silence_secs: f64,
	/// Hard cap on the external duration probe.
	pub probe_timeout_secs: u64,
	/// Fixed floor added to every processing deadline.
	pub timeout_floor_secs: u64,
	/// Deadline multiplier per second of audio on accelerated devices.
	pub accelerated_multiplier: f64,
	/// Deadline multiplier per second of audio on CPU.
	pub unaccelerated_multiplier: f64,
	/// Shortest overlap-text match the aligner accepts as real duplication.
	pub min_match_chars: usize,
	/// Half-width of the window the aligner reads overlap text from.
	pub alignment_window_secs: f64,
	/// Segment cutoff past a chunk boundary for the timestamp-filter merge.
	/// Empirically tuned alongside `alignment_cutoff_secs`; kept as two
	/// separate knobs.
	pub filter_cutoff_secs: f64,
	/// Segment cutoff for the text-alignment merge (half the overlap).
	pub alignment_cutoff_secs: f64,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		let overlap_secs = 15.0;
		Self {
			max_parallel_jobs: 2,
			chunk_workers: 4,
			chunk_secs: 600.0,
			overlap_secs,
			silence_search_window_secs: 60.0,
			silence_noise_db: -30.0,
			min_silence_secs: 0.5,
			probe_timeout_secs: 30,
			timeout_floor_secs: 300,
			accelerated_multiplier: 2.0,
			unaccelerated_multiplier: 6.0,
			min_match_chars: 20,
			alignment_window_secs: overlap_secs + 5.0,
			filter_cutoff_secs: overlap_secs,
			alignment_cutoff_secs: overlap_secs / 2.0,
		}
	}
}

impl PipelineConfig {
	/// Validate configuration values
	pub fn validate(&self) -> Result<(), String> {
		if self.max_parallel_jobs == 0 {
			return Err("max_parallel_jobs must be at least 1".to_string());
		}

		if self.chunk_workers == 0 {
			return Err("chunk_workers must be at least 1".to_string());
		}

		if self.chunk_secs <= 0.0 {
			return Err("chunk_secs must be greater than 0".to_string());
		}

		if self.overlap_secs < 0.0 || self.overlap_secs >= self.chunk_secs {
			return Err("overlap_secs must be in [0, chunk_secs)".to_string());
		}

		if self.probe_timeout_secs == 0 {
			return Err("probe_timeout_secs must be greater than 0".to_string());
		}

		if self.accelerated_multiplier <= 0.0 || self.unaccelerated_multiplier <= 0.0 {
			return Err("deadline multipliers must be greater than 0".to_string());
		}

		if self.min_match_chars == 0 {
			return Err("min_match_chars must be at least 1".to_string());
		}

		Ok(())
	}

	/// Deadline for one whole job: probed duration scaled by the device
	/// multiplier, plus a fixed floor. Unknown duration (`0`) still gets
	/// the floor.
	pub fn processing_timeout(&self, duration_secs: u32, device: DeviceClass) -> Duration {
		let multiplier = match device {
			DeviceClass::Accelerated => self.accelerated_multiplier,
			DeviceClass::Unaccelerated => self.unaccelerated_multiplier,
		};
		let scaled = (f64::from(duration_secs) * multiplier).ceil() as u64;

		Duration::from_secs(scaled + self.timeout_floor_secs)
	}
}
