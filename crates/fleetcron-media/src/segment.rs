//! Cutting an upload into fixed-length raw segments.

use std::path::{Path, PathBuf};

use fleetcron_models::media::segment_file_name;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Command that copies `[start, start + length)` of `input` into `output`
/// without re-encoding.
pub fn cut_command(input: &Path, output: &Path, start_secs: f64, length_secs: f64) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .seek(start_secs)
        .duration(length_secs)
        .stream_copy()
        .output_opt("-avoid_negative_ts", "make_zero")
}

/// Cut one segment.
pub async fn cut_segment(
    runner: &FfmpegRunner,
    input: &Path,
    output: &Path,
    start_secs: f64,
    length_secs: f64,
) -> MediaResult<()> {
    runner.run(&cut_command(input, output, start_secs, length_secs)).await
}

/// Output paths for each segment of `stem` in `dir`.
pub fn segment_paths(dir: &Path, stem: &str, ext: &str, count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| dir.join(segment_file_name(stem, i, ext))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cut_command_copies_streams() {
        let cmd = cut_command(Path::new("in.mov"), Path::new("in.part001.mov"), 150.0, 150.0);
        let args: Vec<String> = cmd.build_args().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss + 1], "150.000");
        assert_eq!(args[ss + 3], "150.000");
        assert!(ss < args.iter().position(|a| a == "-i").unwrap());
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
    }

    #[test]
    fn test_segment_paths() {
        let paths = segment_paths(Path::new("/tmp/x"), "clip", "mov", 3);
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2], PathBuf::from("/tmp/x/clip.part002.mov"));
    }
}
