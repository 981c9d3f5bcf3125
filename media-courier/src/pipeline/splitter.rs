//! Size-based output splitting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::transcoder::{Transcoder, part_pattern};
use crate::utils::fs;

/// Fraction of the ceiling targeted per part, leaving room for container overhead.
const PART_FILL_RATIO: f64 = 0.95;

/// How a file was split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Ordered files to deliver.
    pub parts: Vec<PathBuf>,
    /// The original file is returned even though it exceeds the ceiling.
    pub oversized: bool,
}

impl SplitOutcome {
    fn unchanged(path: &Path, oversized: bool) -> Self {
        Self {
            parts: vec![path.to_path_buf()],
            oversized,
        }
    }
}

/// Number of parts needed for a file of `size` bytes.
pub fn part_count(size: u64, ceiling: u64) -> u64 {
    let per_part = ceiling as f64 * PART_FILL_RATIO;
    (size as f64 / per_part).floor() as u64 + 1
}

/// Segment length, in whole seconds, for `parts` parts over `duration_secs`.
pub fn segment_seconds(duration_secs: f64, parts: u64) -> u64 {
    ((duration_secs / parts.max(1) as f64).floor() as u64).max(1)
}

/// Splits files above the transfer ceiling into time-sliced parts.
pub struct OutputSplitter {
    transcoder: Arc<dyn Transcoder>,
    ceiling: u64,
}

impl OutputSplitter {
    pub fn new(transcoder: Arc<dyn Transcoder>, ceiling: u64) -> Self {
        Self { transcoder, ceiling }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Split `path` if it exceeds the ceiling.
    ///
    /// Never fails: any problem degrades to returning the original file.
    pub async fn split(&self, path: &Path) -> SplitOutcome {
        let size = match fs::file_size(path).await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Cannot read file size, delivering unchanged");
                return SplitOutcome::unchanged(path, false);
            }
        };

        if size <= self.ceiling {
            return SplitOutcome::unchanged(path, false);
        }

        if !self.transcoder.is_available() {
            warn!(path = %path.display(), "Transcoder unavailable, delivering oversized file unchanged");
            return SplitOutcome::unchanged(path, true);
        }

        let parts = part_count(size, self.ceiling);
        info!(
            path = %path.display(),
            size_mb = size / (1024 * 1024),
            parts,
            "File exceeds transfer limit, splitting"
        );

        let duration = match self.transcoder.probe_duration(path).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!(error = %e, "Could not determine duration, delivering unchanged");
                return SplitOutcome::unchanged(path, true);
            }
        };

        let seconds = segment_seconds(duration, parts);
        let (pattern, prefix) = part_pattern(path);

        if let Err(e) = self.transcoder.segment(path, seconds, &pattern).await {
            warn!(error = %e, "Segmenting failed, delivering unchanged");
            remove_parts(path, &prefix).await;
            return SplitOutcome::unchanged(path, true);
        }

        let produced = list_parts(path, &prefix).await;
        if produced.is_empty() {
            warn!(path = %path.display(), "Segmenting produced no parts, delivering unchanged");
            return SplitOutcome::unchanged(path, true);
        }

        info!(parts = produced.len(), segment_seconds = seconds, "Split complete");
        SplitOutcome {
            parts: produced,
            oversized: false,
        }
    }
}

/// Produced part files next to `input`, sorted by name.
async fn list_parts(input: &Path, prefix: &str) -> Vec<PathBuf> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let mut parts = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return parts;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix))
        {
            parts.push(path);
        }
    }
    parts.sort();
    parts
}

async fn remove_parts(input: &Path, prefix: &str) {
    for part in list_parts(input, prefix).await {
        if let Err(e) = fs::remove_file_if_exists(&part).await {
            warn!(error = %e, "Failed to remove partial split output");
        }
    }
}
