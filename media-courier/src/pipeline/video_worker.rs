//! Single-video queue consumer.
//!
//! Jobs run one at a time in submission order:
//! info check, optional live handoff, disk check, cancel check, fetch,
//! split and deliver, finalize. A failing job is reported and the loop moves
//! on to the next one.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Job, JobId};
use crate::extractor::{DownloadRequest, MediaInfo};
use crate::pipeline::cancellation::ActiveJob;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::delivery::{ArtifactSet, DeliveryTarget};
use crate::pipeline::job_queue::QueueConsumer;
use crate::pipeline::live_capture::LiveCaptures;
use crate::pipeline::progress::ProgressReporter;
use crate::utils::fs;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Terminal state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every part was delivered.
    Delivered,
    /// Some parts failed.
    PartiallyDelivered,
    /// Handed to the live-capture supervisor.
    LiveHandoff,
    /// Disk quota would be exceeded; nothing was fetched.
    InsufficientDisk,
    Cancelled,
    Failed,
}

/// Consumer of the single-video queue.
pub struct VideoWorker {
    ctx: Arc<PipelineContext>,
    live: Arc<LiveCaptures>,
}

impl VideoWorker {
    pub fn new(ctx: Arc<PipelineContext>, live: Arc<LiveCaptures>) -> Self {
        Self { ctx, live }
    }

    /// Drain `consumer` until shutdown or until every producer is gone.
    pub async fn run(self, mut consumer: QueueConsumer, shutdown: CancellationToken) {
        info!("Video worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = consumer.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let outcome = self.process(job).await;
            debug!(?outcome, "Video job finished");
        }
        info!("Video worker stopped");
    }

    /// Run one job to completion. Never fails; failures are reported to the chat.
    pub async fn process(&self, job: Job) -> JobOutcome {
        let job_id = JobId::of_job(&job);
        let active = self.ctx.registry.register(job_id.clone());
        let mut reporter = self.ctx.reporter(&job, job_id.clone());

        info!(job_id = %job_id, url = %job.url, quality = %job.quality.label(), "Processing video job");

        match self.execute(&job, active, &mut reporter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Video job failed");
                fs::sweep_owned(&self.ctx.settings.download_dir, &job_id).await;
                reporter.report(&format!("🔥 Error: {e}"), true, false).await;
                JobOutcome::Failed
            }
        }
    }

    async fn execute(
        &self,
        job: &Job,
        active: ActiveJob,
        reporter: &mut ProgressReporter,
    ) -> crate::Result<JobOutcome> {
        reporter
            .report(&format!("🚀 Processing: {}", job.url), true, true)
            .await;

        let info = self.probe(job).await;

        if job.is_live || info.as_ref().is_some_and(|i| i.is_live) {
            let label = job
                .label
                .clone()
                .or_else(|| info.as_ref().map(|i| i.title.clone()))
                .unwrap_or_else(|| job.url.clone());
            info!(job_id = %active.id(), label = %label, "Live source, handing off to capture");
            let live_reporter = self
                .ctx
                .reporter(job, active.id().clone())
                .with_existing_message(reporter.message());
            self.live.spawn(
                Arc::clone(&self.ctx),
                job.clone(),
                active,
                live_reporter,
                label,
            );
            return Ok(JobOutcome::LiveHandoff);
        }

        if let Some(quota) = self.ctx.settings.disk_quota {
            let dir = self.ctx.settings.download_dir.clone();
            let used = self.ctx.pool.run(move || fs::dir_usage_bytes(&dir)).await?;
            let needed = info.as_ref().and_then(|i| i.estimated_size).unwrap_or(0);
            if used.saturating_add(needed) > quota {
                let free = quota.saturating_sub(used);
                warn!(job_id = %active.id(), used, needed, quota, "Disk quota would be exceeded");
                reporter
                    .report(
                        &format!(
                            "❌ Low disk space! Need {:.2} GB, have {:.2} GB.",
                            needed as f64 / GIB,
                            free as f64 / GIB
                        ),
                        true,
                        false,
                    )
                    .await;
                return Ok(JobOutcome::InsufficientDisk);
            }
        }

        if active.is_cancelled() {
            info!(job_id = %active.id(), "Job cancelled before fetching");
            reporter.delete().await;
            return Ok(JobOutcome::Cancelled);
        }

        let request = DownloadRequest {
            url: job.url.clone(),
            quality: job.quality,
            job_id: active.id().clone(),
            output_dir: self.ctx.settings.download_dir.clone(),
            cancel: Some(active.cancellation()),
        };
        let mode = job.quality.label();
        let download = self
            .ctx
            .fetch_with_progress(request, reporter, |update| {
                format!(
                    "⬇️ Downloading ({mode}): {}\nETA: {}",
                    update.percent_text(),
                    update.eta_text()
                )
            })
            .await;

        let download = match download {
            Ok(download) => download,
            Err(e) => {
                let swept = fs::sweep_owned(&self.ctx.settings.download_dir, active.id()).await;
                debug!(job_id = %active.id(), swept, "Swept partial download");
                if e.is_cancelled() {
                    info!(job_id = %active.id(), "Download cancelled");
                    reporter.report("❌ Cancelled.", true, false).await;
                    return Ok(JobOutcome::Cancelled);
                }
                warn!(job_id = %active.id(), error = %e, "Download failed");
                reporter
                    .report(&format!("❌ Download failed: {e}"), true, false)
                    .await;
                return Ok(JobOutcome::Failed);
            }
        };

        let target = DeliveryTarget {
            chat_id: job.chat_id,
            reply_to: job.reply_to,
            title: download.title.clone(),
            source_url: job.url.clone(),
            audio_only: job.quality.is_audio_only(),
            caption_prefix: None,
        };
        let mut artifacts = ArtifactSet::new(&self.ctx.settings.download_dir, active.id().clone());
        let report = self
            .ctx
            .delivery
            .deliver(
                &target,
                &download.path,
                download.thumbnail.as_deref(),
                &mut artifacts,
                Some(&mut *reporter),
            )
            .await;

        if report.is_complete() {
            reporter.delete().await;
            Ok(JobOutcome::Delivered)
        } else if report.sent > 0 {
            reporter
                .report(
                    &format!("⚠️ Delivered {} of {} parts.", report.sent, report.total),
                    true,
                    false,
                )
                .await;
            Ok(JobOutcome::PartiallyDelivered)
        } else {
            reporter.report("❌ Upload failed.", true, false).await;
            Ok(JobOutcome::Failed)
        }
    }

    /// Best-effort metadata probe bounded by the info timeout.
    async fn probe(&self, job: &Job) -> Option<MediaInfo> {
        let ctx = &self.ctx;
        let probe = ctx.failover.run("probe", |route| {
            let extractor = Arc::clone(&ctx.extractor);
            let url = job.url.clone();
            async move { extractor.probe(&url, &route).await }
        });

        match tokio::time::timeout(ctx.settings.info_timeout, probe).await {
            Ok(Ok(info)) => {
                debug!(
                    title = %info.title,
                    estimated_size = ?info.estimated_size,
                    is_live = info.is_live,
                    "Probe complete"
                );
                Some(info)
            }
            Ok(Err(e)) => {
                warn!(url = %job.url, error = %e, "Info check failed, continuing");
                None
            }
            Err(_) => {
                warn!(
                    url = %job.url,
                    timeout_secs = ctx.settings.info_timeout.as_secs(),
                    "Info check timed out, continuing"
                );
                None
            }
        }
    }
}
