//! Delivery of fetched artifacts to a chat.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{ChatId, JobId, MessageId};
use crate::pipeline::progress::ProgressReporter;
use crate::pipeline::splitter::{OutputSplitter, SplitOutcome};
use crate::transfer::{
    FloodRetryPolicy, InlineButton, InlineKeyboard, MessageOptions, Transfer, TransferError,
    Upload, with_flood_retry,
};
use crate::utils::fs;

/// Every local file produced for one job.
///
/// Files are owned exclusively by the job and removed by [`ArtifactSet::cleanup`].
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    dir: PathBuf,
    job_id: JobId,
    files: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new(dir: impl Into<PathBuf>, job_id: JobId) -> Self {
        Self {
            dir: dir.into(),
            job_id,
            files: Vec::new(),
        }
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Remove every tracked file plus anything else under the job's namespace.
    pub async fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.files.drain(..) {
            match fs::remove_file_if_exists(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to remove artifact"),
            }
        }
        removed += fs::sweep_owned(&self.dir, &self.job_id).await;
        debug!(job_id = %self.job_id, removed, "Artifacts cleaned up");
        removed
    }
}

/// Where and how a fetched item is delivered.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub chat_id: ChatId,
    pub reply_to: Option<MessageId>,
    pub title: String,
    /// Page URL, used for the fetch-audio affordance.
    pub source_url: String,
    pub audio_only: bool,
    /// Prepended to every caption, e.g. the playlist title.
    pub caption_prefix: Option<String>,
}

/// One failed part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub index: usize,
    pub error: String,
}

/// Outcome of delivering one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub total: usize,
    pub sent: usize,
    pub failures: Vec<PartFailure>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.sent == self.total
    }
}

/// Splits, uploads and cleans up a job's artifacts.
pub struct DeliveryPipeline {
    transfer: Arc<dyn Transfer>,
    splitter: OutputSplitter,
    retry: FloodRetryPolicy,
}

impl DeliveryPipeline {
    pub fn new(transfer: Arc<dyn Transfer>, splitter: OutputSplitter) -> Self {
        Self {
            transfer,
            splitter,
            retry: FloodRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: FloodRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deliver `media` and remove every artifact of the job afterwards.
    ///
    /// Part failures are reported to the chat and delivery continues with the
    /// next part. Cleanup runs on every path. Stage changes are shown on
    /// `status` when given.
    pub async fn deliver(
        &self,
        target: &DeliveryTarget,
        media: &Path,
        thumbnail: Option<&Path>,
        artifacts: &mut ArtifactSet,
        mut status: Option<&mut ProgressReporter>,
    ) -> DeliveryReport {
        artifacts.track(media);
        if let Some(thumb) = thumbnail {
            artifacts.track(thumb);
        }

        let report = if target.audio_only {
            if let Some(status) = status.as_deref_mut() {
                status.report("⬆️ Uploading audio...", true, false).await;
            }
            self.deliver_audio(target, media, thumbnail).await
        } else {
            self.deliver_video(target, media, thumbnail, artifacts, status.as_deref_mut())
                .await
        };

        if let Some(status) = status.as_deref_mut() {
            status.report("🧹 Cleaning up...", true, false).await;
        }
        artifacts.cleanup().await;
        info!(
            job_id = %artifacts.job_id(),
            sent = report.sent,
            total = report.total,
            "Delivery finished"
        );
        report
    }

    async fn deliver_audio(
        &self,
        target: &DeliveryTarget,
        media: &Path,
        thumbnail: Option<&Path>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            total: 1,
            ..Default::default()
        };

        let mut upload = Upload::new(
            target.chat_id,
            media,
            with_prefix(target, &format!("🎵 {}", target.title)),
        );
        upload.reply_to = target.reply_to;
        upload.thumbnail = thumbnail.map(Path::to_path_buf);
        upload.title = Some(target.title.clone());

        let transfer = Arc::clone(&self.transfer);
        match with_flood_retry(&self.retry, "send_audio", || transfer.send_audio(&upload)).await {
            Ok(_) => report.sent = 1,
            Err(e) => {
                let error = self.describe_failure(media, false, &e).await;
                self.report_part_failure(target, 1, &error).await;
                report.failures.push(PartFailure { index: 1, error });
            }
        }
        report
    }

    async fn deliver_video(
        &self,
        target: &DeliveryTarget,
        media: &Path,
        thumbnail: Option<&Path>,
        artifacts: &mut ArtifactSet,
        mut status: Option<&mut ProgressReporter>,
    ) -> DeliveryReport {
        if let Some(status) = status.as_deref_mut() {
            status.report("✂️ Checking file size...", true, false).await;
        }
        let SplitOutcome { parts, oversized } = self.splitter.split(media).await;
        for part in &parts {
            artifacts.track(part);
        }

        let total = parts.len();
        let mut report = DeliveryReport {
            total,
            ..Default::default()
        };

        let markup = InlineButton::callback("🎵 Download Audio", format!("audio:{}", target.source_url))
            .map(InlineKeyboard::single);
        if markup.is_none() {
            debug!(url = %target.source_url, "Source URL too long for audio button, omitting");
        }

        for (i, part) in parts.iter().enumerate() {
            let index = i + 1;
            let caption = if total > 1 {
                format!("{} (Part {index}/{total})", target.title)
            } else {
                target.title.clone()
            };

            let mut upload = Upload::new(target.chat_id, part, with_prefix(target, &caption));
            upload.reply_to = target.reply_to;
            upload.markup = markup.clone();
            upload.thumbnail = thumbnail.map(Path::to_path_buf);

            info!(part = index, total, path = %part.display(), "Uploading part");
            if let Some(status) = status.as_deref_mut() {
                status
                    .report(&format!("⬆️ Uploading part {index}/{total}..."), true, false)
                    .await;
            }
            let transfer = Arc::clone(&self.transfer);
            match with_flood_retry(&self.retry, "send_video", || transfer.send_video(&upload)).await
            {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    let error = self.describe_failure(part, oversized, &e).await;
                    self.report_part_failure(target, index, &error).await;
                    report.failures.push(PartFailure { index, error });
                }
            }
        }
        report
    }

    /// Error text for a failed part, naming the size limit when the part is
    /// known to exceed it.
    async fn describe_failure(&self, part: &Path, oversized: bool, error: &TransferError) -> String {
        let ceiling = self.splitter.ceiling();
        let over = oversized
            || fs::file_size(part)
                .await
                .is_ok_and(|size| size > ceiling);
        if over {
            format!(
                "file could not be split and exceeds the {} MB transfer limit ({error})",
                ceiling / (1024 * 1024)
            )
        } else {
            error.to_string()
        }
    }

    async fn report_part_failure(&self, target: &DeliveryTarget, index: usize, error: &str) {
        warn!(chat_id = target.chat_id, part = index, error, "Part upload failed");
        let text = format!("❌ Upload failed for part {index}: {error}");
        let options = MessageOptions {
            reply_to: target.reply_to,
            markup: None,
        };
        let transfer = Arc::clone(&self.transfer);
        if let Err(e) = with_flood_retry(&self.retry, "send_failure", || {
            transfer.send_text(target.chat_id, &text, &options)
        })
        .await
        {
            warn!(error = %e, "Failed to report part failure");
        }
    }
}

fn with_prefix(target: &DeliveryTarget, caption: &str) -> String {
    match &target.caption_prefix {
        Some(prefix) => format!("{prefix}\n\n{caption}"),
        None => caption.to_string(),
    }
}
