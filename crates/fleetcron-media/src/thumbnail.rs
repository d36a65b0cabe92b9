//! Thumbnail generation.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use fleetcron_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};

pub fn thumbnail_command(video_path: &Path, output_path: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .input_opt("-ss", THUMBNAIL_TIMESTAMP)
        .output_opt("-frames:v", "1")
        .output_opt("-vf", format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
}

/// Generate a thumbnail from a video file.
pub async fn generate_thumbnail(runner: &FfmpegRunner, video_path: &Path, output_path: &Path) -> MediaResult<()> {
    runner.run(&thumbnail_command(video_path, output_path)).await
}
