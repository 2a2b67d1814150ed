use crate::types::TranscriptionReport;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Job-level failures. Per-chunk problems stay inside [`ChunkError`] and only
/// escalate here when the aggregate result is unusable.
#[derive(Error, Debug)]
pub enum PipelineError {
	#[error("job cancelled")]
	Cancelled {
		/// Merged results for chunks that completed before the cancel was
		/// observed, when any did.
		partial: Option<Box<TranscriptionReport>>,
	},

	#[error("all {0} chunk(s) failed")]
	AllChunksFailed(usize),

	#[error("processing deadline of {}s exceeded", .0.as_secs())]
	DeadlineExceeded(std::time::Duration),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("job slot unavailable: {0}")]
	Semaphore(#[from] tokio::sync::AcquireError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// A failure scoped to a single chunk. Carried in that chunk's result slot and
/// never aborts sibling chunks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
	#[error("chunk cancelled")]
	Cancelled,

	#[error("audio extraction failed: {0}")]
	Extraction(String),

	#[error("engine failure: {0}")]
	Engine(String),
}

impl ChunkError {
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}
