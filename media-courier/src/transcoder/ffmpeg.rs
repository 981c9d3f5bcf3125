//! FFmpeg-backed transcoder.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{StopOutcome, stop_gracefully, tokio_command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{debug, info, warn};

use super::{CaptureProcess, CaptureSpec, TranscodeError, Transcoder};

/// Time a capture gets to finish its current segment after a stop request.
const CAPTURE_STOP_GRACE: Duration = Duration::from_secs(10);

/// Transcoder that shells out to `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
    version: Option<String>,
}

impl FfmpegTranscoder {
    /// Create a transcoder, detecting whether `ffmpeg` is usable.
    pub async fn detect(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        let ffmpeg = ffmpeg.into();
        let version = Self::detect_version(&ffmpeg).await;
        match &version {
            Some(v) => info!(version = %v, "ffmpeg detected"),
            None => warn!(binary = %ffmpeg, "ffmpeg not available; oversized files will not be split"),
        }
        Self {
            ffmpeg,
            ffprobe: ffprobe.into(),
            version,
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    async fn detect_version(path: &str) -> Option<String> {
        tokio_command(path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| {
                String::from_utf8(output.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }

    fn segment_args(input: &Path, segment_seconds: u64, output_pattern: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            segment_seconds.max(1).to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            output_pattern.to_string_lossy().to_string(),
        ]
    }

    /// Arguments capturing segment `index` of `spec`.
    ///
    /// `-fs` stops ffmpeg once the file reaches the segment bound; the
    /// capture then rotates by starting the next index.
    fn capture_args(spec: &CaptureSpec, index: u64) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];

        if let Some(proxy) = spec.route.proxy_url() {
            args.extend(["-http_proxy".to_string(), proxy.to_string()]);
        }

        args.extend([
            "-i".to_string(),
            spec.stream_url.clone(),
            "-c".to_string(),
            "copy".to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-f".to_string(),
            "mpegts".to_string(),
            "-fs".to_string(),
            spec.segment_bytes.to_string(),
            spec.segment_path(index).to_string_lossy().to_string(),
        ]);
        args
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<std::process::Output, TranscodeError> {
        debug!(program, ?args, "Running transcoder");
        let output = tokio_command(program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::Exit {
                program: program.to_string(),
                code: output.status.code(),
                stderr: stderr.lines().last().unwrap_or_default().to_string(),
            });
        }

        Ok(output)
    }

    /// Fallback probe: read the `Duration:` banner of `ffmpeg -i`.
    async fn banner_duration(&self, path: &Path) -> Option<f64> {
        let output = tokio_command(&self.ffmpeg)
            .args(["-hide_banner", "-i"])
            .arg(path)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;
        // `ffmpeg -i` without an output always exits non-zero; only stderr matters.
        parse_duration_banner(&String::from_utf8_lossy(&output.stderr))
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().to_string(),
        ];

        let probed = match self.run(&self.ffprobe, &args).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0),
            Err(e) => {
                debug!(error = %e, "ffprobe failed, falling back to ffmpeg banner");
                None
            }
        };

        match probed {
            Some(duration) => Ok(duration),
            None => self
                .banner_duration(path)
                .await
                .ok_or_else(|| TranscodeError::UnknownDuration(path.display().to_string())),
        }
    }

    async fn segment(
        &self,
        input: &Path,
        segment_seconds: u64,
        output_pattern: &Path,
    ) -> Result<(), TranscodeError> {
        let args = Self::segment_args(input, segment_seconds, output_pattern);
        self.run(&self.ffmpeg, &args).await.map(|_| ())
    }

    async fn start_capture(
        &self,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn CaptureProcess>, TranscodeError> {
        info!(job_id = %spec.job_id, segment_bytes = spec.segment_bytes, "Starting live capture");
        let child = spawn_capture_segment(&self.ffmpeg, spec, 0)?;
        Ok(Box::new(FfmpegCapture {
            ffmpeg: self.ffmpeg.clone(),
            spec: spec.clone(),
            index: 0,
            child,
        }))
    }
}

/// Start one size-bounded ffmpeg run writing segment `index`.
fn spawn_capture_segment(ffmpeg: &str, spec: &CaptureSpec, index: u64) -> Result<Child, TranscodeError> {
    let mut child = tokio_command(ffmpeg)
        .args(FfmpegTranscoder::capture_args(spec, index))
        .env("LC_ALL", "C")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscodeError::Spawn {
            program: ffmpeg.to_string(),
            message: e.to_string(),
        })?;

    if let Some(stderr) = child.stderr.take() {
        let job_id = spec.job_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(job_id = %job_id, "ffmpeg: {}", line);
            }
        });
    }
    Ok(child)
}

/// A live capture made of consecutive size-bounded ffmpeg runs.
///
/// A run that stops with a full segment is followed by a run for the next
/// index; a run that stops short means the stream is over.
struct FfmpegCapture {
    ffmpeg: String,
    spec: CaptureSpec,
    index: u64,
    child: Child,
}

#[async_trait]
impl CaptureProcess for FfmpegCapture {
    fn try_exit(&mut self) -> Result<Option<Option<i32>>, TranscodeError> {
        let Some(status) = self
            .child
            .try_wait()
            .map_err(|e| TranscodeError::Io(e.to_string()))?
        else {
            return Ok(None);
        };

        let written = std::fs::metadata(self.spec.segment_path(self.index))
            .map(|m| m.len())
            .unwrap_or(0);
        if !self.spec.is_segment_full(written) {
            return Ok(Some(status.code()));
        }

        self.index += 1;
        debug!(job_id = %self.spec.job_id, index = self.index, written, "Rotating live segment");
        self.child = spawn_capture_segment(&self.ffmpeg, &self.spec, self.index)?;
        Ok(None)
    }

    async fn terminate(&mut self) -> Result<(), TranscodeError> {
        let outcome = stop_gracefully(&mut self.child, CAPTURE_STOP_GRACE)
            .await
            .map_err(|e| TranscodeError::Io(e.to_string()))?;
        match outcome {
            StopOutcome::Exited(code) => {
                debug!(job_id = %self.spec.job_id, ?code, "Capture stopped")
            }
            StopOutcome::Killed => {
                warn!(job_id = %self.spec.job_id, "Capture did not stop in time, killed")
            }
        }
        Ok(())
    }
}

/// Parse time string (HH:MM:SS.ms) to seconds.
fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the `Duration: HH:MM:SS.ms,` line from ffmpeg's input banner.
fn parse_duration_banner(stderr: &str) -> Option<f64> {
    stderr
        .lines()
        .find_map(|line| line.split("Duration:").nth(1))
        .and_then(|rest| rest.split(',').next())
        .and_then(|t| parse_time(t.trim()))
        .filter(|d| *d > 0.0)
}
