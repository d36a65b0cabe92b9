//! Reassembly of converted segments.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Render an ffmpeg concat-demuxer list. Single quotes in names are escaped
/// the way the demuxer expects (`'\''`).
pub fn concat_manifest<S: AsRef<str>>(files: &[S]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str("file '");
        out.push_str(&file.as_ref().replace('\'', "'\\''"));
        out.push_str("'\n");
    }
    out
}

/// File names listed in a concat manifest, in order.
pub fn parse_concat_manifest(manifest: &str) -> Vec<String> {
    manifest
        .lines()
        .filter_map(|line| line.trim().strip_prefix("file "))
        .map(|quoted| {
            quoted
                .trim()
                .trim_matches('\'')
                .replace("'\\''", "'")
        })
        .collect()
}

/// Concatenate the files listed in `manifest` into `output`.
///
/// Relative names in the manifest resolve against the manifest's directory.
pub async fn concatenate(runner: &FfmpegRunner, manifest: &Path, output: &Path) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(manifest, output).concat_list().stream_copy();
    runner.run(&cmd).await
}
