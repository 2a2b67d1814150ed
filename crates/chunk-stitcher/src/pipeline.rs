//! Job orchestration: one call that takes an audio file from probe to merged
//! transcript.
//!
//! Two nested levels of parallelism: the [`JobSemaphore`] caps whole jobs
//! service-wide, and within a job the [`Dispatcher`] caps concurrent chunks.

use crate::config::{DeviceClass, PipelineConfig};
use crate::dispatch::Dispatcher;
use crate::engine::SpeechEngine;
use crate::error::{PipelineError, Result};
use crate::media::{FfmpegToolkit, MediaToolkit};
use crate::merge::{self, MergeConfig, MergeStrategy};
use crate::registry::{CancellationRegistry, JobSemaphore, JobStage};
use crate::segment;
use crate::types::{ChunkOutcome, TranscriptionReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-job knobs supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
	pub language_hint: Option<String>,
	pub device: DeviceClass,
	/// Snap split points to detected silence instead of hard cuts.
	pub silence_aware: bool,
	pub strategy: MergeStrategy,
}

pub struct TranscriptionPipeline {
	config: PipelineConfig,
	engine: Arc<dyn SpeechEngine>,
	media: Arc<dyn MediaToolkit>,
	registry: CancellationRegistry,
	semaphore: JobSemaphore,
}

impl TranscriptionPipeline {
	/// Build a pipeline around a speech engine, backed by the default
	/// ffmpeg/ffprobe toolkit.
	pub fn new(config: PipelineConfig, engine: Arc<dyn SpeechEngine>) -> Result<Self> {
		config.validate().map_err(PipelineError::Config)?;

		let registry = CancellationRegistry::new();
		let media = Arc::new(FfmpegToolkit::new(registry.clone(), Duration::from_secs(config.probe_timeout_secs)));
		let semaphore = JobSemaphore::new(config.max_parallel_jobs);

		Ok(Self {
			config,
			engine,
			media,
			registry,
			semaphore,
		})
	}

	/// Swap the media toolkit (tests, or alternative tooling).
	#[must_use]
	pub fn with_media(mut self, media: Arc<dyn MediaToolkit>) -> Self {
		self.media = media;
		self
	}

	/// Handle for external callers that need to cancel or inspect jobs.
	pub fn registry(&self) -> &CancellationRegistry {
		&self.registry
	}

	/// Request cooperative cancellation. Returns `false` when there is
	/// nothing to cancel.
	pub fn cancel_job(&self, job_id: &str) -> bool {
		self.registry.mark_cancelled(job_id)
	}

	/// Hard-kill path for a job stuck inside an external tool; returns how
	/// many tracked processes were actually terminated.
	pub fn kill_job_processes(&self, job_id: &str) -> usize {
		self.registry.kill_processes(job_id)
	}

	/// Transcribe one audio file under the given job id.
	///
	/// Blocks on the service-wide job semaphore, registers the job for
	/// cancellation, and unregisters it on every exit path. Partial chunk
	/// failure still returns the best achievable transcript; only a job
	/// with zero usable chunks (or an observed cancellation) fails.
	pub async fn transcribe_file(&self, job_id: &str, source: &Path, options: JobOptions) -> Result<TranscriptionReport> {
		let _permit = self.semaphore.acquire().await?;
		let token = self.registry.register(job_id);

		let result = self.run_job(job_id, source, &options, token).await;

		let stage = match &result {
			Ok(_) => JobStage::Completed,
			Err(PipelineError::Cancelled { .. }) => JobStage::Cancelled,
			Err(_) => JobStage::Failed,
		};
		info!(job_id, stage = ?stage, "job finished");
		self.registry.unregister(job_id);

		result
	}

	async fn run_job(&self, job_id: &str, source: &Path, options: &JobOptions, token: CancellationToken) -> Result<TranscriptionReport> {
		self.registry.set_stage(job_id, JobStage::Running);

		let duration_secs = self.media.probe_duration(job_id, source).await;
		let deadline = self.config.processing_timeout(duration_secs, options.device);

		info!(
			job_id,
			source = %source.display(),
			duration_secs,
			deadline_secs = deadline.as_secs(),
			"🎬 starting transcription job"
		);

		let total = f64::from(duration_secs);
		let spans = if options.silence_aware && duration_secs > 0 {
			let silences = self
				.media
				.detect_silence(job_id, source, self.config.silence_noise_db, self.config.min_silence_secs)
				.await;
			segment::silence_aware_spans(total, self.config.chunk_secs, &silences, self.config.silence_search_window_secs)
		} else {
			segment::fixed_spans(total, self.config.chunk_secs)
		};

		// Chunk audio lives in a scratch dir owned for the whole job.
		let workdir = tempfile::tempdir()?;
		let chunks = segment::materialize_chunks(&spans, self.config.overlap_secs, source, workdir.path());
		info!(job_id, chunks = chunks.len(), "planned chunks");

		let dispatcher = Dispatcher::new(Arc::clone(&self.engine), Arc::clone(&self.media), self.config.chunk_workers);
		let dispatch = dispatcher.run(job_id, chunks, source, options.language_hint.clone(), token.clone());
		let outcomes = match tokio::time::timeout(deadline, dispatch).await {
			Ok(outcomes) => outcomes,
			Err(_) => {
				// Detached chunk workers hold clones of this token; cancelling
				// it stops the engine at its next segment pull. Tracked
				// external processes get the hard-kill path on top.
				token.cancel();
				let killed = self.registry.kill_processes(job_id);
				warn!(job_id, deadline_secs = deadline.as_secs(), killed, "⏰ job exceeded its processing deadline");
				return Err(PipelineError::DeadlineExceeded(deadline));
			}
		};

		let usable = outcomes.iter().filter(|o| o.is_ok()).count();

		// A cancelled job terminates with whatever chunk results exist; it is
		// not a chunk-failure cascade, and completed chunks stay salvageable.
		if token.is_cancelled() {
			info!(job_id, usable, "🛑 job cancelled");
			let partial = (usable > 0).then(|| Box::new(self.build_report(&outcomes, options, duration_secs)));
			return Err(PipelineError::Cancelled { partial });
		}

		if usable == 0 {
			warn!(job_id, failed = outcomes.len(), "no usable chunk results");
			return Err(PipelineError::AllChunksFailed(outcomes.len()));
		}

		let report = self.build_report(&outcomes, options, duration_secs);
		info!(
			job_id,
			chunks = outcomes.len(),
			failed = report.chunk_errors.len(),
			segments = report.transcript.segments.len(),
			language = %report.transcript.language,
			"✅ transcript merged"
		);

		Ok(report)
	}

	fn build_report(&self, outcomes: &[ChunkOutcome], options: &JobOptions, duration_secs: u32) -> TranscriptionReport {
		let chunk_errors: Vec<_> = outcomes
			.iter()
			.filter_map(|o| o.result.as_ref().err().map(|e| (o.chunk.index, e.clone())))
			.collect();

		let merge_config = MergeConfig {
			alignment_window_secs: self.config.alignment_window_secs,
			min_match_chars: self.config.min_match_chars,
			filter_cutoff_secs: self.config.filter_cutoff_secs,
			alignment_cutoff_secs: self.config.alignment_cutoff_secs,
		};
		let transcript = merge::merge(outcomes, options.strategy, &merge_config);

		TranscriptionReport {
			transcript,
			chunk_errors,
			duration_secs,
		}
	}
}
