//! Collaborators and settings shared by every worker loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{Job, JobId, ProxyList};
use crate::extractor::{Download, DownloadRequest, Extractor};
use crate::pipeline::cancellation::CancellationRegistry;
use crate::pipeline::delivery::DeliveryPipeline;
use crate::pipeline::fetch::{FetchError, ProxyFailover};
use crate::pipeline::progress::{MIN_REPORT_INTERVAL, ProgressReporter, ProgressSink, ProgressUpdate};
use crate::pipeline::splitter::OutputSplitter;
use crate::pipeline::worker_pool::BlockingPool;
use crate::transcoder::Transcoder;
use crate::transfer::{FloodRetryPolicy, Transfer};

/// Tunables of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub download_dir: PathBuf,
    /// Disk quota for `download_dir`; `None` disables the check.
    pub disk_quota: Option<u64>,
    pub info_timeout: Duration,
    pub playlist_timeout: Duration,
    pub retry: FloodRetryPolicy,
    pub report_interval: Duration,
    pub blocking_workers: usize,
    /// Poll interval of the live-capture supervisor.
    pub live_poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            disk_quota: None,
            info_timeout: Duration::from_secs(45),
            playlist_timeout: Duration::from_secs(60),
            retry: FloodRetryPolicy::default(),
            report_interval: MIN_REPORT_INTERVAL,
            blocking_workers: 4,
            live_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Shared state handed to each worker loop and live capture task.
pub struct PipelineContext {
    pub extractor: Arc<dyn Extractor>,
    pub transcoder: Arc<dyn Transcoder>,
    pub transfer: Arc<dyn Transfer>,
    pub registry: Arc<CancellationRegistry>,
    pub failover: ProxyFailover,
    pub delivery: DeliveryPipeline,
    pub pool: BlockingPool,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        transfer: Arc<dyn Transfer>,
        routes: ProxyList,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let splitter = OutputSplitter::new(Arc::clone(&transcoder), transfer.size_ceiling());
        let delivery = DeliveryPipeline::new(Arc::clone(&transfer), splitter)
            .with_retry_policy(settings.retry.clone());
        Self {
            extractor,
            transcoder,
            transfer,
            registry: Arc::new(CancellationRegistry::with_shutdown(shutdown)),
            failover: ProxyFailover::new(routes),
            delivery,
            pool: BlockingPool::new(settings.blocking_workers),
            settings,
        }
    }

    /// Status reporter for `job`, reusing its pre-created status message.
    pub fn reporter(&self, job: &Job, job_id: JobId) -> ProgressReporter {
        ProgressReporter::new(Arc::clone(&self.transfer), job.chat_id, job_id)
            .with_reply_to(job.reply_to)
            .with_existing_message(job.status_message)
            .with_retry_policy(self.settings.retry.clone())
            .with_min_interval(self.settings.report_interval)
    }

    /// Download `request` with route failover, rendering progress into the
    /// job's status message.
    ///
    /// The fetch runs as its own task; progress arrives over a channel and
    /// is applied to the reporter here, on the worker's task.
    pub async fn fetch_with_progress<R>(
        self: &Arc<Self>,
        request: DownloadRequest,
        reporter: &mut ProgressReporter,
        render: R,
    ) -> Result<Download, FetchError>
    where
        R: Fn(&ProgressUpdate) -> String,
    {
        let (sink, mut updates) = ProgressSink::channel();
        let ctx = Arc::clone(self);
        let mut fetch =
            tokio::spawn(async move { ctx.failover.download(&ctx.extractor, &request, &sink).await });

        let joined = loop {
            tokio::select! {
                Some(update) = updates.recv() => {
                    reporter.report(&render(&update), false, true).await;
                }
                joined = &mut fetch => break joined,
            }
        };

        joined.unwrap_or_else(|e| {
            warn!(error = %e, "Fetch task failed");
            Err(FetchError::Failed(format!("fetch task failed: {e}")))
        })
    }
}

/// First `max` characters of `text`.
pub fn truncate_title(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
