//! Seam to the speech-to-text engine.
//!
//! The engine is a black box: given one short audio file it yields a lazy
//! sequence of raw segments with chunk-local timestamps, plus the detected
//! language. Laziness matters — the dispatcher re-checks cancellation after
//! every pulled segment, so cancel latency is one segment, not one chunk.

use crate::error::ChunkError;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One raw segment straight from the engine, chunk-local seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
	pub start: f64,
	pub end: f64,
	pub text: String,
}

/// Chunk-level metadata the engine reports up front.
#[derive(Debug, Clone, Default)]
pub struct EngineMeta {
	pub language: String,
	pub duration: f64,
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct EngineError(pub String);

pub type SegmentIter = Box<dyn Iterator<Item = std::result::Result<RawSegment, EngineError>> + Send>;

/// The inference collaborator. Implementations must not assume they own the
/// whole source file; they see one chunk at a time.
pub trait SpeechEngine: Send + Sync {
	fn transcribe(&self, audio: &Path, language_hint: Option<&str>) -> std::result::Result<(SegmentIter, EngineMeta), EngineError>;
}

/// Wraps the engine's segment sequence with a cooperative cancellation check
/// before every pull.
///
/// Yields `ChunkError::Cancelled` at most once the instant the token is set,
/// then fuses. An engine error also fuses the iterator.
pub struct CancellableSegments {
	inner: SegmentIter,
	token: CancellationToken,
	fused: bool,
}

impl CancellableSegments {
	pub fn new(inner: SegmentIter, token: CancellationToken) -> Self {
		Self { inner, token, fused: false }
	}
}

impl Iterator for CancellableSegments {
	type Item = std::result::Result<RawSegment, ChunkError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.fused {
			return None;
		}

		if self.token.is_cancelled() {
			self.fused = true;
			return Some(Err(ChunkError::Cancelled));
		}

		match self.inner.next() {
			Some(Ok(segment)) => Some(Ok(segment)),
			Some(Err(e)) => {
				self.fused = true;
				Some(Err(ChunkError::Engine(e.to_string())))
			}
			None => {
				self.fused = true;
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw(start: f64, text: &str) -> RawSegment {
		RawSegment {
			start,
			end: start + 1.0,
			text: text.to_string(),
		}
	}

	#[test]
	fn passes_segments_through_when_not_cancelled() {
		let inner: SegmentIter = Box::new(vec![Ok(raw(0.0, "a")), Ok(raw(1.0, "b"))].into_iter());
		let collected: Vec<_> = CancellableSegments::new(inner, CancellationToken::new()).collect();

		assert_eq!(collected.len(), 2);
		assert!(collected.iter().all(std::result::Result::is_ok));
	}

	#[test]
	fn stops_after_first_pull_once_cancelled() {
		let token = CancellationToken::new();
		let inner: SegmentIter = Box::new(vec![Ok(raw(0.0, "a")), Ok(raw(1.0, "b")), Ok(raw(2.0, "c"))].into_iter());
		let mut segments = CancellableSegments::new(inner, token.clone());

		assert!(segments.next().unwrap().is_ok());
		token.cancel();

		assert_eq!(segments.next().unwrap().unwrap_err(), ChunkError::Cancelled);
		assert!(segments.next().is_none());
	}

	#[test]
	fn engine_error_fuses_the_iterator() {
		let inner: SegmentIter = Box::new(vec![Err(EngineError("decode blew up".to_string())), Ok(raw(1.0, "never"))].into_iter());
		let mut segments = CancellableSegments::new(inner, CancellationToken::new());

		match segments.next().unwrap() {
			Err(ChunkError::Engine(msg)) => assert!(msg.contains("decode blew up")),
			other => panic!("expected engine error, got {other:?}"),
		}
		assert!(segments.next().is_none());
	}
}
