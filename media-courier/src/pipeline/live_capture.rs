//! Live-stream capture supervision.
//!
//! Each live job gets its own task: resolve the stream endpoint, run the
//! transcoder as a rolling segment capture and upload every rotated segment
//! exactly once. Segments are uploaded and deleted while capture continues,
//! so disk usage stays bounded to about two segments per stream.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::{Job, Route};
use crate::extractor::ExtractError;
use crate::pipeline::cancellation::ActiveJob;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::progress::ProgressReporter;
use crate::transcoder::{CaptureProcess, CaptureSpec};
use crate::transfer::{MessageOptions, Upload, with_flood_retry};
use crate::utils::fs;

/// Upper bound of a single capture segment: 1.9 GiB.
pub const LIVE_SEGMENT_BYTES: u64 = 19 * 1024 * 1024 * 1024 / 10;

/// Poll iterations between two segment listing passes.
const POLLS_PER_SWEEP: usize = 5;

/// Segment size for a transfer endpoint with the given ceiling.
pub fn segment_bytes_for(ceiling: u64) -> u64 {
    LIVE_SEGMENT_BYTES.min(ceiling / 100 * 95)
}

/// Segments from `listing` (sorted oldest first) that are ready to upload.
///
/// The newest segment is still being written unless the capture is over.
pub fn select_pending(
    listing: &[PathBuf],
    uploaded: &HashSet<PathBuf>,
    capture_finished: bool,
) -> Vec<PathBuf> {
    let settled = if capture_finished {
        listing
    } else {
        &listing[..listing.len().saturating_sub(1)]
    };
    settled
        .iter()
        .filter(|path| !uploaded.contains(*path))
        .cloned()
        .collect()
}

/// How a live capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Finished { segments: usize },
    Cancelled { segments: usize },
    Failed,
}

/// Registry of running live-capture tasks.
#[derive(Default)]
pub struct LiveCaptures {
    tasks: parking_lot::Mutex<JoinSet<()>>,
    active: Arc<AtomicUsize>,
}

impl LiveCaptures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captures currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start supervising a live job on its own task.
    pub fn spawn(
        &self,
        ctx: Arc<PipelineContext>,
        job: Job,
        active_job: ActiveJob,
        reporter: ProgressReporter,
        label: String,
    ) {
        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::SeqCst);

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let supervisor = LiveSupervisor {
                ctx,
                job,
                active_job,
                reporter,
                label,
            };
            let outcome = supervisor.run().await;
            debug!(?outcome, "Live capture task finished");
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Wait for every capture task to finish.
    ///
    /// Captures stop on their own once the shutdown token is cancelled.
    pub async fn join_all(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Live capture task panicked");
            }
        }
    }
}

/// Supervises one live capture.
pub struct LiveSupervisor {
    ctx: Arc<PipelineContext>,
    job: Job,
    active_job: ActiveJob,
    reporter: ProgressReporter,
    label: String,
}

impl LiveSupervisor {
    pub fn new(
        ctx: Arc<PipelineContext>,
        job: Job,
        active_job: ActiveJob,
        reporter: ProgressReporter,
        label: String,
    ) -> Self {
        Self {
            ctx,
            job,
            active_job,
            reporter,
            label,
        }
    }

    pub async fn run(mut self) -> LiveOutcome {
        let job_id = self.active_job.id().clone();
        info!(job_id = %job_id, url = %self.job.url, "Starting live capture");

        let outcome = self.capture().await;

        let swept = fs::sweep_owned(&self.ctx.settings.download_dir, &job_id).await;
        if swept > 0 {
            debug!(job_id = %job_id, swept, "Removed leftover live segments");
        }

        let text = match outcome {
            LiveOutcome::Finished { segments } => {
                format!("✅ Live recording finished: {}\n📦 {segments} segment(s) uploaded.", self.label)
            }
            LiveOutcome::Cancelled { segments } => {
                format!("❌ Live recording cancelled after {segments} segment(s).")
            }
            LiveOutcome::Failed => return outcome,
        };
        self.reporter.report(&text, true, false).await;
        info!(job_id = %job_id, ?outcome, "Live capture ended");
        outcome
    }

    async fn capture(&mut self) -> LiveOutcome {
        self.reporter
            .report(&format!("🔴 Live stream detected: {}\nResolving stream...", self.label), true, true)
            .await;

        let ctx = Arc::clone(&self.ctx);
        let url = self.job.url.clone();
        let resolved = ctx
            .failover
            .run("stream_url", |route| {
                let extractor = Arc::clone(&ctx.extractor);
                let url = url.clone();
                async move {
                    let stream = extractor.stream_url(&url, &route).await?;
                    Ok::<_, ExtractError>((stream, route))
                }
            })
            .await;

        let (stream_url, route) = match resolved {
            Ok(resolved) => resolved,
            Err(e) if e.is_cancelled() => return LiveOutcome::Cancelled { segments: 0 },
            Err(e) => {
                self.fail(&format!("❌ Could not resolve live stream: {e}")).await;
                return LiveOutcome::Failed;
            }
        };

        if self.active_job.is_cancelled() {
            return LiveOutcome::Cancelled { segments: 0 };
        }

        let spec = CaptureSpec {
            stream_url,
            output_dir: self.ctx.settings.download_dir.clone(),
            job_id: self.active_job.id().clone(),
            segment_bytes: segment_bytes_for(self.ctx.transfer.size_ceiling()),
            route,
        };

        let mut process = match self.ctx.transcoder.start_capture(&spec).await {
            Ok(process) => process,
            Err(e) => {
                self.fail(&format!("❌ Live capture failed to start: {e}")).await;
                return LiveOutcome::Failed;
            }
        };

        self.reporter
            .report(&format!("🔴 Recording live: {}", self.label), true, true)
            .await;

        self.supervise(&spec, process.as_mut()).await
    }

    async fn supervise(&mut self, spec: &CaptureSpec, process: &mut dyn CaptureProcess) -> LiveOutcome {
        let mut uploaded = HashSet::new();
        let mut segments = 0;
        let interval = self.ctx.settings.live_poll_interval;

        loop {
            for _ in 0..POLLS_PER_SWEEP {
                if self.active_job.is_cancelled() {
                    info!(job_id = %spec.job_id, "Live capture cancelled, stopping transcoder");
                    if let Err(e) = process.terminate().await {
                        warn!(job_id = %spec.job_id, error = %e, "Failed to stop capture process");
                    }
                    return LiveOutcome::Cancelled { segments };
                }

                match process.try_exit() {
                    Ok(None) => {}
                    Ok(Some(code)) => {
                        info!(job_id = %spec.job_id, ?code, "Capture process exited");
                        segments += self.upload_pending(spec, &mut uploaded, true).await;
                        return LiveOutcome::Finished { segments };
                    }
                    Err(e) => {
                        warn!(job_id = %spec.job_id, error = %e, "Lost track of capture process");
                        if let Err(e) = process.terminate().await {
                            warn!(job_id = %spec.job_id, error = %e, "Failed to stop capture process");
                        }
                        segments += self.upload_pending(spec, &mut uploaded, true).await;
                        return LiveOutcome::Finished { segments };
                    }
                }

                tokio::time::sleep(interval).await;
            }

            segments += self.upload_pending(spec, &mut uploaded, false).await;
        }
    }

    /// Upload settled segments not uploaded yet. Returns how many were sent.
    async fn upload_pending(
        &mut self,
        spec: &CaptureSpec,
        uploaded: &mut HashSet<PathBuf>,
        capture_finished: bool,
    ) -> usize {
        let listing = match self.list_segments(spec).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(job_id = %spec.job_id, error = %e, "Failed to list live segments");
                return 0;
            }
        };

        let mut sent = 0;
        for segment in select_pending(&listing, uploaded, capture_finished) {
            uploaded.insert(segment.clone());
            if self.upload_segment(&segment, uploaded.len()).await {
                sent += 1;
            }
            if let Err(e) = fs::remove_file_if_exists(&segment).await {
                warn!(error = %e, "Failed to remove uploaded segment");
            }
        }
        sent
    }

    async fn list_segments(&self, spec: &CaptureSpec) -> crate::Result<Vec<PathBuf>> {
        let prefix = spec.segment_prefix();
        let owned = fs::list_owned(&spec.output_dir, &spec.job_id).await?;
        Ok(owned
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect())
    }

    async fn upload_segment(&self, segment: &Path, number: usize) -> bool {
        let size = fs::file_size(segment).await.unwrap_or(0);
        if size == 0 {
            debug!(path = %segment.display(), "Skipping empty live segment");
            return false;
        }

        let mut upload = Upload::new(
            self.job.chat_id,
            segment,
            format!("🔴 {} (Segment {number})", self.label),
        );
        upload.reply_to = self.job.reply_to;

        info!(path = %segment.display(), size, "Uploading live segment");
        let transfer = Arc::clone(&self.ctx.transfer);
        match with_flood_retry(&self.ctx.settings.retry, "send_live_segment", || {
            transfer.send_video(&upload)
        })
        .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %segment.display(), error = %e, "Live segment upload failed");
                let text = format!("❌ Upload failed for segment {number}: {e}");
                let options = MessageOptions {
                    reply_to: self.job.reply_to,
                    markup: None,
                };
                if let Err(e) = with_flood_retry(&self.ctx.settings.retry, "send_failure", || {
                    transfer.send_text(self.job.chat_id, &text, &options)
                })
                .await
                {
                    warn!(error = %e, "Failed to report live segment upload failure");
                }
                false
            }
        }
    }

    async fn fail(&mut self, text: &str) {
        error!(job_id = %self.active_job.id(), "{text}");
        self.reporter.report(text, true, false).await;
    }
}
