//! The seam between the transcoding pipeline and the external tools.
//!
//! Jobs depend on [`MediaTools`] rather than on ffmpeg directly so the
//! pipeline can run against a fake in tests and on nodes without the tools.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use fleetcron_models::EncodingConfig;

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegRunner};
use crate::error::MediaResult;
use crate::{concat, probe, segment, thumbnail, transcode};

/// Out-of-process media operations. Every operation writes exactly one output
/// file and fails when that file was not produced.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Whether the tools are installed. Checked before each tick.
    fn available(&self) -> MediaResult<()>;

    async fn probe_duration(&self, input: &Path) -> MediaResult<f64>;

    async fn cut_segment(&self, input: &Path, output: &Path, start_secs: f64, length_secs: f64) -> MediaResult<()>;

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()>;

    /// Concatenate the files listed in a concat manifest.
    async fn concatenate(&self, manifest: &Path, output: &Path) -> MediaResult<()>;

    async fn thumbnail(&self, video: &Path, output: &Path) -> MediaResult<()>;
}

/// [`MediaTools`] backed by the ffmpeg and ffprobe binaries on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTools {
    runner: FfmpegRunner,
    encoding: EncodingConfig,
}

impl FfmpegTools {
    pub fn new(encoding: EncodingConfig) -> Self {
        Self {
            runner: FfmpegRunner::new(),
            encoding,
        }
    }

    /// Kill any single invocation that runs longer than `secs`.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.runner = self.runner.with_timeout(secs);
        self
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    fn available(&self) -> MediaResult<()> {
        check_ffmpeg()?;
        check_ffprobe()?;
        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> MediaResult<f64> {
        probe::probe_duration(input).await
    }

    async fn cut_segment(&self, input: &Path, output: &Path, start_secs: f64, length_secs: f64) -> MediaResult<()> {
        segment::cut_segment(&self.runner, input, output, start_secs, length_secs).await
    }

    async fn transcode(&self, input: &Path, output: &Path) -> MediaResult<()> {
        info!(input = %input.display(), output = %output.display(), "Transcoding segment");
        transcode::transcode(&self.runner, input, output, &self.encoding).await
    }

    async fn concatenate(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        concat::concatenate(&self.runner, manifest, output).await
    }

    async fn thumbnail(&self, video: &Path, output: &Path) -> MediaResult<()> {
        thumbnail::generate_thumbnail(&self.runner, video, output).await
    }
}
