//! Media extractor capability.
//!
//! The extractor resolves a URL to media and performs the network transfer.
//! Every call takes the [`Route`] to use; route failover lives in the
//! pipeline, not here.

pub mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobId, Quality, Route};
use crate::pipeline::cancellation::JobCancellation;
use crate::pipeline::progress::ProgressSink;

pub use ytdlp::YtDlpExtractor;

/// Extractor failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Free-text failure as reported by the extractor.
    #[error("{0}")]
    Failed(String),

    /// The job was cancelled while the extractor was running.
    #[error("Download cancelled by user")]
    Cancelled,
}

impl ExtractError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Metadata from an info-only probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<f64>,
    /// Best-effort size estimate in bytes.
    pub estimated_size: Option<u64>,
    pub is_live: bool,
    /// Canonical page URL, when the extractor reports one.
    pub webpage_url: Option<String>,
}

/// One entry of a flat listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Flat listing of a playlist or channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub entries: Vec<ListingEntry>,
}

/// A download request for one media item.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Quality,
    /// Filename namespace for every file the download produces.
    pub job_id: JobId,
    pub output_dir: PathBuf,
    /// Checked on every progress tick; `None` disables mid-download cancellation.
    pub cancel: Option<JobCancellation>,
}

impl DownloadRequest {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub title: String,
    pub source_id: String,
    pub thumbnail: Option<PathBuf>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch metadata without downloading.
    async fn probe(&self, url: &str, route: &Route) -> Result<MediaInfo, ExtractError>;

    /// Flat listing of a collection; `limit` keeps only the first entries.
    async fn list_entries(
        &self,
        url: &str,
        limit: Option<usize>,
        route: &Route,
    ) -> Result<Listing, ExtractError>;

    /// Download one item, publishing progress to `progress`.
    async fn download(
        &self,
        request: &DownloadRequest,
        route: &Route,
        progress: ProgressSink,
    ) -> Result<Download, ExtractError>;

    /// Resolve the direct media endpoint of a (live) page.
    async fn stream_url(&self, url: &str, route: &Route) -> Result<String, ExtractError>;
}
