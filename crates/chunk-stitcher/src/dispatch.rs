//! Bounded-parallel per-chunk transcription.
//!
//! Chunks run under a fixed-size worker pool and finish in whatever order
//! they like; the outcome list is always in `chunk_index` order because
//! results are collected in submission order. The merge step depends on that
//! ordering.

use crate::engine::{CancellableSegments, SpeechEngine};
use crate::error::ChunkError;
use crate::media::MediaToolkit;
use crate::timecode;
use crate::types::{ChunkDescriptor, ChunkOutcome, ChunkTranscript, Segment};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Dispatcher {
	engine: Arc<dyn SpeechEngine>,
	media: Arc<dyn MediaToolkit>,
	max_workers: usize,
}

impl Dispatcher {
	pub fn new(engine: Arc<dyn SpeechEngine>, media: Arc<dyn MediaToolkit>, max_workers: usize) -> Self {
		Self {
			engine,
			media,
			max_workers: max_workers.max(1),
		}
	}

	/// Transcribe every chunk, at most `max_workers` at a time.
	///
	/// The returned vec has one outcome per input chunk, in `chunk_index`
	/// order regardless of completion order. Individual failures land in
	/// their own slot and never abort siblings; this function itself never
	/// fails.
	pub async fn run(&self, job_id: &str, chunks: Vec<ChunkDescriptor>, source: &Path, language_hint: Option<String>, token: CancellationToken) -> Vec<ChunkOutcome> {
		// Single-chunk jobs read the source directly; only real splits need
		// per-chunk audio extracted.
		let needs_extraction = chunks.len() > 1;
		let pool = Arc::new(Semaphore::new(self.max_workers));

		info!(job_id, chunks = chunks.len(), workers = self.max_workers, "dispatching chunk transcriptions");

		let mut handles = Vec::with_capacity(chunks.len());
		for chunk in &chunks {
			let task = ChunkTask {
				engine: Arc::clone(&self.engine),
				media: Arc::clone(&self.media),
				pool: Arc::clone(&pool),
				job_id: job_id.to_string(),
				source: source.to_path_buf(),
				chunk: chunk.clone(),
				language_hint: language_hint.clone(),
				token: token.clone(),
				needs_extraction,
			};
			handles.push(tokio::spawn(task.run()));
		}

		// Awaiting in submission order pins final ordering to chunk_index no
		// matter when each worker finishes.
		let mut outcomes = Vec::with_capacity(chunks.len());
		for (chunk, handle) in chunks.into_iter().zip(handles) {
			let result = match handle.await {
				Ok(result) => result,
				Err(e) => {
					warn!(job_id, chunk = chunk.index, error = %e, "chunk worker panicked");
					Err(ChunkError::Engine(format!("chunk worker panicked: {e}")))
				}
			};

			if let Err(error) = &result {
				if error.is_cancelled() {
					debug!(job_id, chunk = chunk.index, "chunk cancelled");
				} else {
					warn!(job_id, chunk = chunk.index, error = %error, "chunk failed");
				}
			}

			outcomes.push(ChunkOutcome { chunk, result });
		}

		outcomes
	}
}

struct ChunkTask {
	engine: Arc<dyn SpeechEngine>,
	media: Arc<dyn MediaToolkit>,
	pool: Arc<Semaphore>,
	job_id: String,
	source: PathBuf,
	chunk: ChunkDescriptor,
	language_hint: Option<String>,
	token: CancellationToken,
	needs_extraction: bool,
}

impl ChunkTask {
	async fn run(self) -> Result<ChunkTranscript, ChunkError> {
		let _permit = self
			.pool
			.acquire()
			.await
			.map_err(|e| ChunkError::Engine(format!("worker pool closed: {e}")))?;

		// Cancelled before any work: skip inference entirely.
		if self.token.is_cancelled() {
			return Err(ChunkError::Cancelled);
		}

		if self.needs_extraction {
			self
				.media
				.extract_range(&self.job_id, &self.source, &self.chunk.path, self.chunk.start_time, self.chunk.end_time)
				.await?;
		}

		if self.token.is_cancelled() {
			return Err(ChunkError::Cancelled);
		}

		let engine = Arc::clone(&self.engine);
		let path = self.chunk.path.clone();
		let hint = self.language_hint.clone();
		let token = self.token.clone();
		let transcript = tokio::task::spawn_blocking(move || transcribe_chunk(engine.as_ref(), &path, hint.as_deref(), token))
			.await
			.map_err(|e| ChunkError::Engine(format!("inference task panicked: {e}")))??;

		debug!(
			job_id = %self.job_id,
			chunk = self.chunk.index,
			segments = transcript.segments.len(),
			"chunk transcribed"
		);

		// Translate chunk-local timestamps into job-global time.
		Ok(offset_transcript(transcript, self.chunk.start_time))
	}
}

/// Consume the engine's lazy segment sequence, checking cancellation after
/// every pulled element. Runs on a blocking thread.
fn transcribe_chunk(engine: &dyn SpeechEngine, audio: &Path, language_hint: Option<&str>, token: CancellationToken) -> Result<ChunkTranscript, ChunkError> {
	let (raw_segments, meta) = engine.transcribe(audio, language_hint).map_err(|e| ChunkError::Engine(e.to_string()))?;

	let mut segments = Vec::new();
	let mut pieces = Vec::new();
	for item in CancellableSegments::new(raw_segments, token) {
		let raw = item?;
		let text = raw.text.trim().to_string();
		if !text.is_empty() {
			pieces.push(text.clone());
		}
		segments.push(Segment {
			start: timecode::format_timestamp(raw.start),
			end: timecode::format_timestamp(raw.end),
			text,
		});
	}

	Ok(ChunkTranscript {
		text: pieces.join(" "),
		segments,
		language: meta.language,
	})
}

fn offset_transcript(mut transcript: ChunkTranscript, offset_secs: f64) -> ChunkTranscript {
	for segment in &mut transcript.segments {
		segment.start = timecode::shift_timestamp(&segment.start, offset_secs);
		segment.end = timecode::shift_timestamp(&segment.end, offset_secs);
	}

	transcript
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::{EngineError, EngineMeta, RawSegment, SegmentIter};
	use async_trait::async_trait;
	use std::sync::Mutex;
	use std::time::Duration;

	/// Engine yielding scripted segments per chunk file name, with an
	/// optional per-call delay to scramble completion order.
	struct ScriptedEngine {
		delays_ms: Mutex<Vec<u64>>,
		fail_on: Option<String>,
	}

	impl ScriptedEngine {
		fn new(delays_ms: Vec<u64>) -> Self {
			Self {
				delays_ms: Mutex::new(delays_ms),
				fail_on: None,
			}
		}
	}

	impl SpeechEngine for ScriptedEngine {
		fn transcribe(&self, audio: &Path, _language_hint: Option<&str>) -> Result<(SegmentIter, EngineMeta), EngineError> {
			let name = audio.file_stem().unwrap().to_string_lossy().to_string();
			if self.fail_on.as_deref() == Some(name.as_str()) {
				return Err(EngineError(format!("scripted failure for {name}")));
			}

			let delay = self.delays_ms.lock().unwrap().pop().unwrap_or(0);
			std::thread::sleep(Duration::from_millis(delay));

			let iter: SegmentIter = Box::new(std::iter::once(Ok(RawSegment {
				start: 1.0,
				end: 2.0,
				text: format!("text from {name}"),
			})));
			Ok((iter, EngineMeta {
				language: "en".to_string(),
				duration: 2.0,
			}))
		}
	}

	struct NoopMedia;

	#[async_trait]
	impl MediaToolkit for NoopMedia {
		async fn probe_duration(&self, _job_id: &str, _path: &Path) -> u32 {
			0
		}

		async fn detect_silence(&self, _job_id: &str, _path: &Path, _noise_db: f64, _min_silence_secs: f64) -> Vec<(f64, f64)> {
			Vec::new()
		}

		async fn extract_range(&self, _job_id: &str, _input: &Path, _output: &Path, _start: f64, _end: f64) -> Result<(), ChunkError> {
			Ok(())
		}
	}

	fn chunk(index: u32, start: f64, end: f64) -> ChunkDescriptor {
		ChunkDescriptor {
			index,
			path: PathBuf::from(format!("/work/chunk_{index:03}.wav")),
			start_time: start,
			end_time: end,
			duration: end - start,
		}
	}

	fn dispatcher(engine: ScriptedEngine, workers: usize) -> Dispatcher {
		Dispatcher::new(Arc::new(engine), Arc::new(NoopMedia), workers)
	}

	#[tokio::test]
	async fn outcomes_are_ordered_by_index_despite_completion_order() {
		// First-submitted chunks get the longest delays, so they finish last.
		let engine = ScriptedEngine::new(vec![0, 20, 40, 60]);
		let chunks: Vec<_> = (0..4).map(|i| chunk(i, f64::from(i) * 10.0, f64::from(i + 1) * 10.0)).collect();

		let outcomes = dispatcher(engine, 4)
			.run("job-order", chunks, Path::new("/audio/in.wav"), None, CancellationToken::new())
			.await;

		let indices: Vec<u32> = outcomes.iter().map(|o| o.chunk.index).collect();
		assert_eq!(indices, vec![0, 1, 2, 3]);
		for outcome in &outcomes {
			let transcript = outcome.transcript().unwrap();
			assert_eq!(transcript.text, format!("text from chunk_{:03}", outcome.chunk.index));
		}
	}

	#[tokio::test]
	async fn segments_are_offset_into_job_time() {
		let engine = ScriptedEngine::new(vec![0, 0]);
		let chunks = vec![chunk(0, 0.0, 600.0), chunk(1, 585.0, 1200.0)];

		let outcomes = dispatcher(engine, 2)
			.run("job-offset", chunks, Path::new("/audio/in.wav"), None, CancellationToken::new())
			.await;

		let first = &outcomes[0].transcript().unwrap().segments[0];
		assert_eq!(first.start, "00:00:01,000");

		let second = &outcomes[1].transcript().unwrap().segments[0];
		// 585.0 + 1.0 local seconds
		assert_eq!(second.start, "00:09:46,000");
	}

	#[tokio::test]
	async fn one_failed_chunk_does_not_abort_siblings() {
		let engine = ScriptedEngine {
			delays_ms: Mutex::new(vec![0, 0, 0]),
			fail_on: Some("chunk_001".to_string()),
		};
		let chunks = vec![chunk(0, 0.0, 10.0), chunk(1, 10.0, 20.0), chunk(2, 20.0, 30.0)];

		let outcomes = dispatcher(engine, 2)
			.run("job-partial", chunks, Path::new("/audio/in.wav"), None, CancellationToken::new())
			.await;

		assert!(outcomes[0].is_ok());
		assert!(matches!(outcomes[1].result, Err(ChunkError::Engine(_))));
		assert!(outcomes[2].is_ok());
	}

	#[tokio::test]
	async fn pre_cancelled_job_skips_all_inference() {
		let engine = ScriptedEngine::new(vec![0, 0]);
		let token = CancellationToken::new();
		token.cancel();

		let outcomes = dispatcher(engine, 2)
			.run("job-cancelled", vec![chunk(0, 0.0, 10.0), chunk(1, 10.0, 20.0)], Path::new("/audio/in.wav"), None, token)
			.await;

		assert_eq!(outcomes.len(), 2);
		for outcome in &outcomes {
			assert_eq!(outcome.result, Err(ChunkError::Cancelled));
		}
	}

	#[tokio::test]
	async fn failed_extraction_is_isolated_to_its_chunk() {
		struct FailingMedia;

		#[async_trait]
		impl MediaToolkit for FailingMedia {
			async fn probe_duration(&self, _job_id: &str, _path: &Path) -> u32 {
				0
			}

			async fn detect_silence(&self, _job_id: &str, _path: &Path, _noise_db: f64, _min_silence_secs: f64) -> Vec<(f64, f64)> {
				Vec::new()
			}

			async fn extract_range(&self, _job_id: &str, _input: &Path, output: &Path, _start: f64, _end: f64) -> Result<(), ChunkError> {
				if output.to_string_lossy().contains("chunk_000") {
					Err(ChunkError::Extraction("no space left".to_string()))
				} else {
					Ok(())
				}
			}
		}

		let dispatcher = Dispatcher::new(Arc::new(ScriptedEngine::new(vec![0, 0])), Arc::new(FailingMedia), 2);
		let outcomes = dispatcher
			.run("job-extract", vec![chunk(0, 0.0, 10.0), chunk(1, 10.0, 20.0)], Path::new("/audio/in.wav"), None, CancellationToken::new())
			.await;

		assert!(matches!(outcomes[0].result, Err(ChunkError::Extraction(_))));
		assert!(outcomes[1].is_ok());
	}
}
