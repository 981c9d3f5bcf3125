//! Media transcoder capability.
//!
//! Three argv-based operations: probe a file's duration, time-slice a file
//! into ordered parts with stream copy, and capture a live stream into a
//! rolling sequence of segment files.

pub mod ffmpeg;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobId, Route};

pub use ffmpeg::FfmpegTranscoder;

/// Transcoder failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not determine duration of {0}")]
    UnknownDuration(String),

    #[error("transcoder IO error: {0}")]
    Io(String),
}

/// Parameters of a live capture.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// Direct media endpoint.
    pub stream_url: String,
    pub output_dir: PathBuf,
    pub job_id: JobId,
    /// Upper bound of one segment file.
    pub segment_bytes: u64,
    /// Route used to reach the stream.
    pub route: Route,
}

impl CaptureSpec {
    /// File name prefix shared by every segment of this capture.
    pub fn segment_prefix(&self) -> String {
        format!("{}_live_", self.job_id)
    }

    /// Path of segment `index`. Names sort in capture order.
    pub fn segment_path(&self, index: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}{index:05}.ts", self.segment_prefix()))
    }

    /// Whether a segment of `written` bytes reached the size bound, so the
    /// capture should continue in a new segment.
    pub fn is_segment_full(&self, written: u64) -> bool {
        written >= self.segment_bytes - self.segment_bytes / 100
    }
}

/// A running capture process.
#[async_trait]
pub trait CaptureProcess: Send {
    /// `Some(exit code)` once the process has exited.
    fn try_exit(&mut self) -> Result<Option<Option<i32>>, TranscodeError>;

    /// Ask the process to stop and wait until it has.
    async fn terminate(&mut self) -> Result<(), TranscodeError>;
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Whether the transcoder binary is usable.
    fn is_available(&self) -> bool;

    /// Total duration of a media file, in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError>;

    /// Slice `input` into parts of `segment_seconds` each, written to
    /// `output_pattern` (a printf-style `%03d` pattern).
    async fn segment(
        &self,
        input: &Path,
        segment_seconds: u64,
        output_pattern: &Path,
    ) -> Result<(), TranscodeError>;

    /// Start capturing a live stream into rolling segment files.
    async fn start_capture(
        &self,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn CaptureProcess>, TranscodeError>;
}

/// Output pattern and produced-file prefix for splitting `input`.
///
/// `dir/<stem>.<ext>` becomes `dir/<stem>_part%03d.<ext>`; produced files
/// share the `<stem>_part` prefix.
pub fn part_pattern(input: &Path) -> (PathBuf, String) {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_string();
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!("{stem}_part");
    (dir.join(format!("{prefix}%03d.{ext}")), prefix)
}
