//! Chunked transcription of arbitrarily long audio files.
//!
//! A speech-to-text engine that is only efficient on short segments gets fed
//! an hours-long recording: this crate splits the audio (fixed-length or
//! snapped to silence), fans chunks out to the engine under a bounded worker
//! pool, tolerates per-chunk failure, supports mid-flight cancellation
//! (cooperative flags plus tracked-pid hard kills), and stitches the ordered
//! results back into one duplicate-free transcript with job-global
//! timestamps.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod media;
pub mod merge;
pub mod pipeline;
pub mod registry;
pub mod segment;
pub mod timecode;
pub mod types;

pub use config::{DeviceClass, PipelineConfig};
pub use dispatch::Dispatcher;
pub use engine::{CancellableSegments, EngineError, EngineMeta, RawSegment, SegmentIter, SpeechEngine};
pub use error::{ChunkError, PipelineError, Result};
pub use media::{FfmpegToolkit, MediaToolkit};
pub use merge::{merge, MergeConfig, MergeStrategy};
pub use pipeline::{JobOptions, TranscriptionPipeline};
pub use registry::{CancellationRegistry, JobSemaphore, JobStage, TaskInfo};
pub use segment::SilenceInterval;
pub use types::{ChunkDescriptor, ChunkOutcome, ChunkTranscript, MergedTranscript, Segment, TranscriptionReport};
