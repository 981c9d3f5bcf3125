//! Playlist queue consumer.
//!
//! Entries are fetched and delivered strictly one after another so that at
//! most one entry's artifacts are on disk at any time.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{Job, JobId};
use crate::extractor::{DownloadRequest, Listing};
use crate::pipeline::context::{PipelineContext, truncate_title};
use crate::pipeline::delivery::{ArtifactSet, DeliveryTarget};
use crate::pipeline::job_queue::QueueConsumer;
use crate::transfer::{MessageOptions, with_flood_retry};
use crate::utils::fs;

/// Characters of an entry title shown in status lines.
const TITLE_PREVIEW_CHARS: usize = 30;

/// Summary of one playlist job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaylistSummary {
    pub total: usize,
    /// Entries started, including failed ones.
    pub attempted: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Consumer of the playlist queue.
pub struct PlaylistWorker {
    ctx: Arc<PipelineContext>,
}

impl PlaylistWorker {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(self, mut consumer: QueueConsumer, shutdown: CancellationToken) {
        info!("Playlist worker started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = consumer.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let summary = self.process(job).await;
            debug!(?summary, "Playlist job finished");
        }
        info!("Playlist worker stopped");
    }

    /// Run one playlist job. Never fails; failures are reported to the chat.
    pub async fn process(&self, job: Job) -> PlaylistSummary {
        let ctx = &self.ctx;
        let playlist_id = JobId::of_playlist(&job);
        let active = ctx.registry.register(playlist_id.clone());
        let mut reporter = ctx.reporter(&job, playlist_id.clone());
        let mut summary = PlaylistSummary::default();

        info!(job_id = %playlist_id, url = %job.url, "Processing playlist job");
        reporter.report("📋 Getting playlist info...", true, true).await;

        let listing = match self.list(&job).await {
            Ok(listing) => listing,
            Err(message) => {
                warn!(job_id = %playlist_id, error = %message, "Playlist listing failed");
                reporter
                    .report(&format!("❌ Failed to get playlist info: {message}"), true, false)
                    .await;
                return summary;
            }
        };

        if listing.entries.is_empty() {
            reporter.report("❌ No videos found in playlist.", true, false).await;
            return summary;
        }

        summary.total = listing.entries.len();
        let total = summary.total;
        reporter
            .report(
                &format!(
                    "📋 Playlist: {}\n🎬 Found {total} videos.\n🚀 Starting sequential process...",
                    listing.title
                ),
                true,
                true,
            )
            .await;

        for (i, entry) in listing.entries.iter().enumerate() {
            let index = i + 1;
            if active.is_cancelled() {
                info!(job_id = %playlist_id, attempted = summary.attempted, "Playlist cancelled");
                summary.cancelled = true;
                break;
            }
            summary.attempted += 1;

            let preview = truncate_title(&entry.title, TITLE_PREVIEW_CHARS);
            reporter
                .report(&format!("🔄 Processing {index}/{total}: {preview}..."), true, true)
                .await;

            let entry_id = JobId::from(format!("{playlist_id}_e{index}"));
            let request = DownloadRequest {
                url: entry.url.clone(),
                quality: job.quality,
                job_id: entry_id.clone(),
                output_dir: ctx.settings.download_dir.clone(),
                cancel: None,
            };

            let download = ctx
                .fetch_with_progress(request, &mut reporter, |update| {
                    format!(
                        "📋 Playlist: {index}/{total}\n⬇️ Video: {}",
                        update.percent_text()
                    )
                })
                .await;

            let download = match download {
                Ok(download) => download,
                Err(e) => {
                    fs::sweep_owned(&ctx.settings.download_dir, &entry_id).await;
                    warn!(job_id = %entry_id, error = %e, "Playlist entry failed, skipping");
                    summary.skipped += 1;
                    self.notify(&job, &format!("⚠️ Skipped {preview}: {e}")).await;
                    continue;
                }
            };

            let target = DeliveryTarget {
                chat_id: job.chat_id,
                reply_to: job.reply_to,
                title: download.title.clone(),
                source_url: entry.url.clone(),
                audio_only: job.quality.is_audio_only(),
                caption_prefix: Some(format!("📋 {}", listing.title)),
            };
            let mut artifacts = ArtifactSet::new(&ctx.settings.download_dir, entry_id);
            let report = ctx
                .delivery
                .deliver(
                    &target,
                    &download.path,
                    download.thumbnail.as_deref(),
                    &mut artifacts,
                    Some(&mut reporter),
                )
                .await;

            if report.sent > 0 {
                summary.delivered += 1;
            } else {
                summary.skipped += 1;
            }
        }

        let text = if summary.cancelled {
            format!(
                "❌ Playlist cancelled after {} of {total} videos.",
                summary.attempted
            )
        } else {
            format!("✨ Playlist complete! Finished {} videos.", summary.attempted)
        };
        reporter.report(&text, true, false).await;
        info!(job_id = %playlist_id, ?summary, "Playlist finished");
        summary
    }

    async fn list(&self, job: &Job) -> Result<Listing, String> {
        let ctx = &self.ctx;
        let listing = ctx.failover.run("list_entries", |route| {
            let extractor = Arc::clone(&ctx.extractor);
            let url = job.url.clone();
            async move { extractor.list_entries(&url, None, &route).await }
        });

        match tokio::time::timeout(ctx.settings.playlist_timeout, listing).await {
            Ok(Ok(listing)) => Ok(listing),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                ctx.settings.playlist_timeout.as_secs()
            )),
        }
    }

    /// Send a standalone message that stays in the chat.
    async fn notify(&self, job: &Job, text: &str) {
        let options = MessageOptions {
            reply_to: job.reply_to,
            markup: None,
        };
        let transfer = Arc::clone(&self.ctx.transfer);
        if let Err(e) = with_flood_retry(&self.ctx.settings.retry, "send_notice", || {
            transfer.send_text(job.chat_id, text, &options)
        })
        .await
        {
            error!(chat_id = job.chat_id, error = %e, "Failed to send notice");
        }
    }
}
