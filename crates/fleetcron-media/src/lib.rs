//! FFmpeg CLI wrapper for the transcoding pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Duration probing via FFprobe
//! - Segment cutting, transcoding, concatenation and thumbnails
//! - The [`MediaTools`] trait the pipeline job is written against

pub mod command;
pub mod concat;
pub mod error;
pub mod probe;
pub mod segment;
pub mod thumbnail;
pub mod tools;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, ensure_output, FfmpegCommand, FfmpegRunner};
pub use concat::{concat_manifest, parse_concat_manifest};
pub use error::{MediaError, MediaResult};
pub use probe::probe_duration;
pub use tools::{FfmpegTools, MediaTools};
