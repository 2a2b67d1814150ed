//! Split planning: where to cut the source audio, and how those cuts become
//! chunk descriptors with deliberate boundary overlap.
//!
//! Planning is a state-free function of its inputs. Overlap is applied only
//! when materializing chunk audio, never at split-decision time.

use crate::types::ChunkDescriptor;
use std::path::Path;
use tracing::debug;

/// A detected span of near-silence, `(start_seconds, end_seconds)`.
pub type SilenceInterval = (f64, f64);

/// Plan fixed-length spans: `[t, min(t + target, total))` until the file is
/// covered.
///
/// `total <= 0` means the duration probe failed; the whole file becomes one
/// chunk so downstream code always has something to process.
pub fn fixed_spans(total_duration: f64, target_secs: f64) -> Vec<(f64, f64)> {
	if total_duration <= 0.0 {
		return vec![(0.0, total_duration.max(0.0))];
	}

	let mut spans = Vec::new();
	let mut current = 0.0;
	while current < total_duration {
		let end = (current + target_secs).min(total_duration);
		spans.push((current, end));
		current = end;
	}

	spans
}

/// Plan spans that snap each cut to a nearby silence interval.
///
/// For every cut, silence intervals whose start lies within
/// ±`search_window_secs` of the target are candidates; the one numerically
/// closest wins (first encountered on ties) and the cut lands on its
/// midpoint. With no candidate the cut stays exactly at the target.
pub fn silence_aware_spans(total_duration: f64, target_secs: f64, silences: &[SilenceInterval], search_window_secs: f64) -> Vec<(f64, f64)> {
	if total_duration <= 0.0 {
		return vec![(0.0, total_duration.max(0.0))];
	}
	if silences.is_empty() {
		return fixed_spans(total_duration, target_secs);
	}

	let mut spans = Vec::new();
	let mut current = 0.0;
	while current < total_duration {
		let target = (current + target_secs).min(total_duration);

		let mut split = target;
		if target < total_duration {
			if let Some(&(start, end)) = nearest_silence(silences, target, search_window_secs) {
				let midpoint = (start + end) / 2.0;
				// A silence behind the cursor cannot be a cut; keep moving.
				if midpoint > current && midpoint < total_duration {
					debug!(target, midpoint, "snapped split point to silence");
					split = midpoint;
				}
			}
		}

		spans.push((current, split));
		current = split;
	}

	spans
}

fn nearest_silence(silences: &[SilenceInterval], target: f64, window: f64) -> Option<&SilenceInterval> {
	let mut best: Option<&SilenceInterval> = None;
	for interval in silences {
		let distance = (interval.0 - target).abs();
		if distance > window {
			continue;
		}
		// Strict less-than keeps the first encountered on ties.
		match best {
			Some(current) if (current.0 - target).abs() <= distance => {}
			_ => best = Some(interval),
		}
	}

	best
}

/// Turn planned spans into chunk descriptors.
///
/// Every chunk after the first has its start pulled back by `overlap_secs`
/// (clamped at zero) so boundary words are transcribed twice and the merge
/// step can reconcile them. A single span keeps the source file as its path;
/// multi-chunk jobs get per-chunk files under `chunk_dir`.
pub fn materialize_chunks(spans: &[(f64, f64)], overlap_secs: f64, source: &Path, chunk_dir: &Path) -> Vec<ChunkDescriptor> {
	let extension = source.extension().and_then(|e| e.to_str()).unwrap_or("wav");

	spans
		.iter()
		.enumerate()
		.map(|(i, &(start, end))| {
			let start = if i == 0 { start } else { (start - overlap_secs).max(0.0) };
			let path = if spans.len() == 1 {
				source.to_path_buf()
			} else {
				chunk_dir.join(format!("chunk_{i:03}.{extension}"))
			};

			ChunkDescriptor {
				index: i as u32,
				path,
				start_time: start,
				end_time: end,
				duration: end - start,
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;
	use std::path::PathBuf;

	fn source() -> PathBuf {
		PathBuf::from("/audio/input.wav")
	}

	#[test]
	fn fixed_spans_cover_duration_exactly() {
		let spans = fixed_spans(1250.0, 600.0);
		assert_eq!(spans, vec![(0.0, 600.0), (600.0, 1200.0), (1200.0, 1250.0)]);
	}

	#[test]
	fn fixed_spans_single_chunk_when_short() {
		assert_eq!(fixed_spans(120.0, 600.0), vec![(0.0, 120.0)]);
	}

	#[test]
	fn unknown_duration_yields_one_whole_file_span() {
		assert_eq!(fixed_spans(0.0, 600.0), vec![(0.0, 0.0)]);
		assert_eq!(silence_aware_spans(-1.0, 600.0, &[(10.0, 11.0)], 60.0), vec![(0.0, 0.0)]);
	}

	#[test]
	fn spans_are_contiguous_and_monotonic() {
		for &(total, target) in &[(1250.0, 600.0), (90.0, 30.0), (599.0, 600.0), (601.0, 600.0)] {
			let spans = fixed_spans(total, target);
			for window in spans.windows(2) {
				assert_abs_diff_eq!(window[0].1, window[1].0);
				assert!(window[0].0 < window[1].0);
			}
			assert_abs_diff_eq!(spans.last().unwrap().1, total);
		}
	}

	#[test]
	fn silence_aware_snaps_to_interval_midpoint() {
		// Target cut at 600; silence [590, 594] is within the window.
		let spans = silence_aware_spans(1200.0, 600.0, &[(590.0, 594.0)], 60.0);
		assert_abs_diff_eq!(spans[0].1, 592.0);
		assert_abs_diff_eq!(spans[1].0, 592.0);
		assert_abs_diff_eq!(spans.last().unwrap().1, 1200.0);
	}

	#[test]
	fn silence_aware_picks_closest_interval() {
		let silences = [(550.0, 552.0), (605.0, 606.0), (640.0, 642.0)];
		let spans = silence_aware_spans(1200.0, 600.0, &silences, 60.0);
		assert_abs_diff_eq!(spans[0].1, 605.5);
	}

	#[test]
	fn silence_aware_tie_prefers_first_encountered() {
		// Both starts are exactly 10s from the 600s target.
		let silences = [(590.0, 590.5), (610.0, 610.5)];
		let spans = silence_aware_spans(1200.0, 600.0, &silences, 60.0);
		assert_abs_diff_eq!(spans[0].1, 590.25);
	}

	#[test]
	fn silence_outside_window_falls_back_to_target() {
		let spans = silence_aware_spans(1200.0, 600.0, &[(100.0, 102.0)], 60.0);
		assert_abs_diff_eq!(spans[0].1, 600.0);
	}

	#[test]
	fn no_silences_matches_fixed_mode() {
		assert_eq!(silence_aware_spans(1250.0, 600.0, &[], 60.0), fixed_spans(1250.0, 600.0));
	}

	#[test]
	fn silence_behind_cursor_cannot_stall_planning() {
		// Midpoint of this interval is behind every cut after the first;
		// planning must still terminate and cover the file.
		let spans = silence_aware_spans(1800.0, 600.0, &[(540.0, 560.0)], 60.0);
		assert_abs_diff_eq!(spans.last().unwrap().1, 1800.0);
		for window in spans.windows(2) {
			assert!(window[0].0 < window[1].0);
		}
	}

	#[test]
	fn materialize_pulls_back_all_but_first_chunk() {
		let dir = PathBuf::from("/tmp/work");
		let chunks = materialize_chunks(&[(0.0, 600.0), (600.0, 1200.0)], 15.0, &source(), &dir);

		assert_eq!(chunks.len(), 2);
		assert_abs_diff_eq!(chunks[0].start_time, 0.0);
		assert_abs_diff_eq!(chunks[0].end_time, 600.0);
		assert_abs_diff_eq!(chunks[1].start_time, 585.0);
		assert_abs_diff_eq!(chunks[1].end_time, 1200.0);
		assert_eq!(chunks[1].index, 1);
		assert_eq!(chunks[1].path, dir.join("chunk_001.wav"));
	}

	#[test]
	fn materialize_clamps_pullback_at_zero() {
		let dir = PathBuf::from("/tmp/work");
		let chunks = materialize_chunks(&[(0.0, 10.0), (10.0, 20.0)], 15.0, &source(), &dir);
		assert_abs_diff_eq!(chunks[1].start_time, 0.0);
	}

	#[test]
	fn materialize_single_span_keeps_source_path() {
		let dir = PathBuf::from("/tmp/work");
		let chunks = materialize_chunks(&[(0.0, 120.0)], 15.0, &source(), &dir);

		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].path, source());
		assert_abs_diff_eq!(chunks[0].start_time, 0.0);
	}
}
