//! Stitching ordered per-chunk results into one transcript.
//!
//! Two strategies reconcile the deliberate boundary overlap:
//!
//! - `TimestampFilter` drops segments whose start falls inside the overlapped
//!   region. Cheap, but can drop real content or leave duplicate wording; a
//!   known approximation, kept as-is.
//! - `TextAlignment` finds the longest contiguous text match between the two
//!   transcriptions of the overlap and keeps only what follows it. When the
//!   alignment is inconclusive it appends everything — never silently drops.
//!
//! Error chunks contribute nothing but keep their position: a failed middle
//! chunk produces a content gap, not a reordering.

use crate::timecode::parse_timestamp;
use crate::types::{ChunkOutcome, MergedTranscript, Segment};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
	#[default]
	TimestampFilter,
	TextAlignment,
}

/// Merge tuning. The two segment cutoffs are empirically tuned and kept as
/// independent knobs.
#[derive(Debug, Clone)]
pub struct MergeConfig {
	/// Half-width of the window overlap text is read from, seconds.
	pub alignment_window_secs: f64,
	/// Shortest match accepted as real duplication; anything shorter is
	/// statistically likely to be coincidental.
	pub min_match_chars: usize,
	/// Segment-start cutoff past a chunk boundary for `TimestampFilter`.
	pub filter_cutoff_secs: f64,
	/// Segment-start cutoff for `TextAlignment` (half the overlap).
	pub alignment_cutoff_secs: f64,
}

impl Default for MergeConfig {
	fn default() -> Self {
		Self {
			alignment_window_secs: 20.0,
			min_match_chars: 20,
			filter_cutoff_secs: 15.0,
			alignment_cutoff_secs: 7.5,
		}
	}
}

/// Combine ordered chunk outcomes into one transcript.
///
/// Zero or one results short-circuit: the multi-chunk paths must degenerate
/// to exactly this.
pub fn merge(outcomes: &[ChunkOutcome], strategy: MergeStrategy, config: &MergeConfig) -> MergedTranscript {
	match outcomes {
		[] => MergedTranscript::default(),
		[single] => single.transcript().map_or_else(MergedTranscript::default, |t| MergedTranscript {
			text: t.text.clone(),
			segments: t.segments.clone(),
			language: t.language.clone(),
		}),
		_ => match strategy {
			MergeStrategy::TimestampFilter => merge_by_timestamp(outcomes, config),
			MergeStrategy::TextAlignment => merge_by_alignment(outcomes, config),
		},
	}
}

fn detected_language(outcomes: &[ChunkOutcome]) -> String {
	outcomes
		.iter()
		.find_map(|o| o.transcript())
		.map(|t| t.language.clone())
		.unwrap_or_default()
}

fn merge_by_timestamp(outcomes: &[ChunkOutcome], config: &MergeConfig) -> MergedTranscript {
	let mut pieces: Vec<&str> = Vec::new();
	let mut segments: Vec<Segment> = Vec::new();

	for outcome in outcomes {
		let Some(transcript) = outcome.transcript() else { continue };

		if !transcript.text.is_empty() {
			pieces.push(&transcript.text);
		}

		if outcome.chunk.index == 0 {
			segments.extend(transcript.segments.iter().cloned());
		} else {
			// Segments starting inside the overlapped region were already
			// covered by the previous chunk.
			let cutoff = outcome.chunk.start_time + config.filter_cutoff_secs;
			segments.extend(transcript.segments.iter().filter(|s| parse_timestamp(&s.start) >= cutoff).cloned());
		}
	}

	MergedTranscript {
		text: pieces.join(" "),
		segments,
		language: detected_language(outcomes),
	}
}

fn merge_by_alignment(outcomes: &[ChunkOutcome], config: &MergeConfig) -> MergedTranscript {
	let mut text = String::new();
	let mut segments: Vec<Segment> = Vec::new();
	let mut previous: Option<&ChunkOutcome> = None;

	for outcome in outcomes {
		let Ok(transcript) = &outcome.result else {
			// Failed chunks still advance the boundary: the next chunk
			// aligns against this one's (empty) overlap and appends in full.
			previous = Some(outcome);
			continue;
		};

		if outcome.chunk.index == 0 {
			text.push_str(&transcript.text);
			segments.extend(transcript.segments.iter().cloned());
		} else {
			let boundary = outcome.chunk.start_time;
			let window = config.alignment_window_secs;

			let prev_overlap = previous
				.and_then(ChunkOutcome::transcript)
				.map(|prev| segment_text_in_range(&prev.segments, boundary - window, boundary + window))
				.unwrap_or_default();
			let curr_overlap = segment_text_in_range(&transcript.segments, boundary, boundary + 2.0 * window);

			let appended = deduplicate_overlap(&prev_overlap, &curr_overlap, &transcript.text, config);
			if !appended.is_empty() {
				if !text.is_empty() {
					text.push(' ');
				}
				text.push_str(&appended);
			}

			let cutoff = boundary + config.alignment_cutoff_secs;
			segments.extend(transcript.segments.iter().filter(|s| parse_timestamp(&s.start) >= cutoff).cloned());
		}

		previous = Some(outcome);
	}

	MergedTranscript {
		text,
		segments,
		language: detected_language(outcomes),
	}
}

/// Concatenated text of segments whose start lies in `[from, to]`.
fn segment_text_in_range(segments: &[Segment], from: f64, to: f64) -> String {
	let pieces: Vec<&str> = segments
		.iter()
		.filter(|s| {
			let start = parse_timestamp(&s.start);
			start >= from && start <= to
		})
		.map(|s| s.text.as_str())
		.filter(|t| !t.is_empty())
		.collect();

	pieces.join(" ")
}

/// Decide what part of the current chunk's full text survives the boundary.
///
/// A sufficiently long contiguous match between the two overlap texts is
/// taken as proof of duplication: everything in the current chunk up to and
/// including that match is dropped. No match, or a match below the
/// threshold, appends the full text — inconclusive alignment never loses
/// content.
fn deduplicate_overlap(prev_overlap: &str, curr_overlap: &str, full_text: &str, config: &MergeConfig) -> String {
	if prev_overlap.is_empty() || curr_overlap.is_empty() {
		return full_text.to_string();
	}

	let Some(matched) = longest_common_run(prev_overlap, curr_overlap) else {
		return full_text.to_string();
	};

	if matched.chars().count() < config.min_match_chars {
		debug!(match_len = matched.chars().count(), "overlap match below threshold, appending in full");
		return full_text.to_string();
	}

	match text_after_match(full_text, &matched) {
		Some(tail) => {
			debug!(match_len = matched.chars().count(), "deduplicated overlap wording");
			tail
		}
		// Matched inside the overlap extract but not locatable in the full
		// text; keep everything rather than guess.
		None => full_text.to_string(),
	}
}

/// Case-folded characters with positions aligned to the original string.
fn folded_chars(s: &str) -> Vec<char> {
	s.chars().map(|c| c.to_lowercase().next().unwrap_or(c)).collect()
}

/// Longest contiguous case-insensitive match between `a` and `b`, returned
/// as it appears in `b`. Classic longest-matching-block, O(|a|·|b|) with a
/// rolling row — both inputs are short overlap extracts.
fn longest_common_run(a: &str, b: &str) -> Option<String> {
	let a_folded = folded_chars(a);
	let b_folded = folded_chars(b);
	let b_original: Vec<char> = b.chars().collect();

	if a_folded.is_empty() || b_folded.is_empty() {
		return None;
	}

	let mut previous_row = vec![0_usize; b_folded.len() + 1];
	let mut best_len = 0;
	let mut best_end_in_b = 0;

	for &a_char in &a_folded {
		let mut row = vec![0_usize; b_folded.len() + 1];
		for (j, &b_char) in b_folded.iter().enumerate() {
			if a_char == b_char {
				row[j + 1] = previous_row[j] + 1;
				if row[j + 1] > best_len {
					best_len = row[j + 1];
					best_end_in_b = j + 1;
				}
			}
		}
		previous_row = row;
	}

	if best_len == 0 {
		return None;
	}

	Some(b_original[best_end_in_b - best_len..best_end_in_b].iter().collect())
}

/// Locate `matched` in `full` case-insensitively and return what follows it,
/// leading whitespace stripped.
fn text_after_match(full: &str, matched: &str) -> Option<String> {
	let full_folded = folded_chars(full);
	let match_folded = folded_chars(matched);

	if match_folded.is_empty() || match_folded.len() > full_folded.len() {
		return None;
	}

	let position = full_folded.windows(match_folded.len()).position(|window| window == match_folded.as_slice())?;

	let full_original: Vec<char> = full.chars().collect();
	let tail: String = full_original[position + match_folded.len()..].iter().collect();

	Some(tail.trim_start().to_string())
}
