//! Building and running single ffmpeg invocations.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

/// Lines of stderr kept when a command fails.
const STDERR_TAIL_LINES: usize = 20;

/// One ffmpeg call: options that apply to the input, the input, options that
/// apply to the output, the output. The output is always overwritten.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    before_input: Vec<String>,
    after_input: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            before_input: Vec::new(),
            after_input: Vec::new(),
        }
    }

    /// Input option, e.g. `input_opt("-ss", "12")`.
    pub fn input_opt(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.before_input.push(flag.to_string());
        self.before_input.push(value.into());
        self
    }

    /// Output option, e.g. `output_opt("-c:v", "libx264")`.
    pub fn output_opt(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.after_input.push(flag.to_string());
        self.after_input.push(value.into());
        self
    }

    /// Input-side seek; fast and keyframe-aligned.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_opt("-ss", format!("{:.3}", seconds))
    }

    pub fn duration(self, seconds: f64) -> Self {
        self.input_opt("-t", format!("{:.3}", seconds))
    }

    /// Treat the input as a concat-demuxer list whose entries may be absolute.
    pub fn concat_list(self) -> Self {
        self.input_opt("-f", "concat").input_opt("-safe", "0")
    }

    pub fn stream_copy(self) -> Self {
        self.output_opt("-c", "copy")
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-v".into(), "error".into()];
        args.extend(self.before_input.iter().map(OsString::from));
        args.push("-i".into());
        args.push(self.input.clone().into_os_string());
        args.extend(self.after_input.iter().map(OsString::from));
        args.push(self.output.clone().into_os_string());
        args
    }
}

/// Runs [`FfmpegCommand`]s, killing any that exceed the timeout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Run the command and require that it wrote a non-empty output file.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!(output = %cmd.output_path().display(), "ffmpeg {:?}", args);

        let child = Command::new(FFMPEG)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            None => child.wait_with_output().await?,
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(output = %cmd.output_path().display(), "ffmpeg killed after {:?}", limit);
                    return Err(MediaError::Timeout {
                        tool: FFMPEG,
                        secs: limit.as_secs(),
                    });
                }
            },
        };

        if !output.status.success() {
            return Err(MediaError::ToolFailed {
                tool: FFMPEG,
                status: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        ensure_output(cmd.output_path()).await
    }
}

/// A zero exit status is not proof of success; the output file must exist
/// and hold data.
pub async fn ensure_output(path: &Path) -> MediaResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(MediaError::MissingOutput(path.to_path_buf())),
    }
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
}

pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which(FFMPEG).map_err(|_| MediaError::ToolMissing(FFMPEG))
}

pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which(FFPROBE).map_err(|_| MediaError::ToolMissing(FFPROBE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(cmd: &FfmpegCommand) -> String {
        cmd.build_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_seek_precedes_input() {
        let cmd = FfmpegCommand::new("input.mov", "output.mp4")
            .seek(150.0)
            .duration(150.0)
            .output_opt("-c:v", "libx264");

        assert_eq!(
            joined(&cmd),
            "-y -v error -ss 150.000 -t 150.000 -i input.mov -c:v libx264 output.mp4"
        );
    }

    #[test]
    fn test_concat_args() {
        let cmd = FfmpegCommand::new("concat.txt", "out.mp4").concat_list().stream_copy();
        let args = joined(&cmd);
        assert!(args.contains("-f concat -safe 0 -i concat.txt"));
        assert!(args.ends_with("-c copy out.mp4"));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn test_ensure_output_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert!(matches!(ensure_output(&missing).await, Err(MediaError::MissingOutput(_))));

        let empty = dir.path().join("empty.mp4");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(ensure_output(&empty).await.is_err());

        let full = dir.path().join("full.mp4");
        tokio::fs::write(&full, b"data").await.unwrap();
        tokio_test::assert_ok!(ensure_output(&full).await);
    }
}
