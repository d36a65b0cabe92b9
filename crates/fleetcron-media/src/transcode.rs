//! Segment conversion to the delivery format.

use std::path::Path;

use fleetcron_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Build the re-encode command for one segment.
pub fn transcode_command(input: &Path, output: &Path, encoding: &EncodingConfig) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .output_opt("-c:v", &encoding.codec)
        .output_opt("-preset", &encoding.preset)
        .output_opt("-crf", encoding.crf.to_string())
        .output_opt("-c:a", &encoding.audio_codec)
        .output_opt("-b:a", &encoding.audio_bitrate)
        .output_opt("-movflags", "+faststart")
}

pub async fn transcode(
    runner: &FfmpegRunner,
    input: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> MediaResult<()> {
    runner.run(&transcode_command(input, output, encoding)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_uses_encoding() {
        let encoding = EncodingConfig {
            crf: 28,
            ..Default::default()
        };
        let args = transcode_command(Path::new("a.mov"), Path::new("a.mp4"), &encoding).build_args();
        let joined = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 28"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.ends_with("a.mp4"));
    }
}
