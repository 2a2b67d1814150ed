use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One bounded slice of the source audio, processed independently.
///
/// Chunks for a job form a covering, non-decreasing partition of
/// `[0, total_duration]`, with a bounded overlap pulled into every chunk
/// after the first. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
	/// Position of this chunk in the final transcript ordering.
	pub index: u32,
	/// Audio file holding this chunk. Equals the source file for
	/// single-chunk jobs.
	pub path: PathBuf,
	/// Start offset in the source, seconds.
	pub start_time: f64,
	/// End offset in the source, seconds. `0.0` together with
	/// `duration == 0.0` means "whole file of unknown length".
	pub end_time: f64,
	pub duration: f64,
}

/// One recognized span of speech, with `HH:MM:SS,mmm` timestamps.
///
/// Segments are chunk-local until the dispatcher offsets them into
/// job-global time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
	pub start: String,
	pub end: String,
	pub text: String,
}

/// Successful transcription of one chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTranscript {
	pub text: String,
	pub segments: Vec<Segment>,
	pub language: String,
}

/// The result slot for one chunk: either its transcript or the isolated
/// failure that produced no text.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
	pub chunk: ChunkDescriptor,
	pub result: std::result::Result<ChunkTranscript, ChunkError>,
}

impl ChunkOutcome {
	pub fn transcript(&self) -> Option<&ChunkTranscript> {
		self.result.as_ref().ok()
	}

	pub fn is_ok(&self) -> bool {
		self.result.is_ok()
	}
}

/// A single ordered transcript stitched from per-chunk results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedTranscript {
	pub text: String,
	pub segments: Vec<Segment>,
	pub language: String,
}

impl MergedTranscript {
	pub fn is_empty(&self) -> bool {
		self.text.is_empty() && self.segments.is_empty()
	}
}

/// Merged transcript plus enough per-chunk detail for the caller to decide
/// whether to retry failed spans.
#[derive(Debug, Clone)]
pub struct TranscriptionReport {
	pub transcript: MergedTranscript,
	/// `(chunk index, error)` for every failed chunk, in index order.
	pub chunk_errors: Vec<(u32, ChunkError)>,
	/// Probed source duration in whole seconds; `0` when unknown.
	pub duration_secs: u32,
}
