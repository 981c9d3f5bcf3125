//! Subscription monitor.
//!
//! Scans every subscribed channel on a fixed interval, marks each new upload
//! processed before queuing it, and enqueues one job per subscriber. A channel
//! that is live right now gets a live job instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::{SubscriptionDbModel, SubscriptionStore};
use crate::domain::{ChatId, Job, Quality};
use crate::extractor::{Listing, MediaInfo};
use crate::pipeline::PipelineManager;
use crate::transfer::{FloodRetryPolicy, MessageOptions, Transfer, with_flood_retry};
use crate::{Error, Result};

/// Channel uploads page.
pub fn channel_videos_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{channel_id}/videos")
}

/// Channel live page; resolves to the current broadcast when one is running.
pub fn channel_live_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{channel_id}/live")
}

/// Timing and limits of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Newest uploads inspected per channel.
    pub latest_per_channel: usize,
    /// Pause between two channels of one scan.
    pub channel_pause: Duration,
    /// Dedup records older than this are pruned after each scan.
    pub retention_days: u32,
    pub check_live: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(300),
            latest_per_channel: 3,
            channel_pause: Duration::from_secs(5),
            retention_days: 30,
            check_live: true,
        }
    }
}

/// One subscriber of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscriber {
    chat_id: ChatId,
    quality: Quality,
}

/// Background scanner of channel subscriptions.
pub struct SubscriptionMonitor {
    store: Arc<dyn SubscriptionStore>,
    manager: Arc<PipelineManager>,
    transfer: Arc<dyn Transfer>,
    retry: FloodRetryPolicy,
    settings: MonitorSettings,
}

impl SubscriptionMonitor {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        manager: Arc<PipelineManager>,
        settings: MonitorSettings,
    ) -> Self {
        let ctx = manager.context();
        let transfer = Arc::clone(&ctx.transfer);
        let retry = ctx.settings.retry.clone();
        Self {
            store,
            manager,
            transfer,
            retry,
            settings,
        }
    }

    /// Run the monitor on its own task until `token` is cancelled.
    pub fn start(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            "Subscription monitor started"
        );
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(&self, token: CancellationToken) {
        if !sleep_or_cancel(self.settings.initial_delay, &token).await {
            info!("Subscription monitor stopped");
            return;
        }

        loop {
            let queued = self.scan(&token).await;
            debug!(queued, "Subscription scan complete");

            match self
                .store
                .cleanup_processed_older_than(self.settings.retention_days)
                .await
            {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Pruned old processed records"),
                Err(e) => warn!(error = %e, "Failed to prune processed records"),
            }

            if !sleep_or_cancel(self.settings.interval, &token).await {
                break;
            }
        }
        info!("Subscription monitor stopped");
    }

    /// Check every subscribed channel once. Returns the number of jobs queued.
    pub async fn scan(&self, token: &CancellationToken) -> usize {
        let subscriptions = match self.store.list_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "Failed to load subscriptions");
                return 0;
            }
        };
        if subscriptions.is_empty() {
            return 0;
        }

        let channels = group_by_channel(&subscriptions);
        info!(
            subscriptions = subscriptions.len(),
            channels = channels.len(),
            "Checking channel subscriptions"
        );

        let mut queued = 0;
        for (i, (channel_id, (channel_name, subscribers))) in channels.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            if i > 0 && !sleep_or_cancel(self.settings.channel_pause, token).await {
                break;
            }

            match self.check_channel(channel_id, channel_name, subscribers).await {
                Ok(count) => queued += count,
                Err(e) => error!(channel_id = %channel_id, error = %e, "Failed to check channel"),
            }
        }
        queued
    }

    /// Check one channel for a single chat right away.
    ///
    /// Returns the number of newly queued videos.
    pub async fn check_channel_now(
        &self,
        channel_id: &str,
        channel_name: &str,
        chat_id: ChatId,
        quality: Quality,
    ) -> Result<usize> {
        let subscribers = [Subscriber { chat_id, quality }];
        self.check_channel(channel_id, channel_name, &subscribers).await
    }

    async fn check_channel(
        &self,
        channel_id: &str,
        channel_name: &str,
        subscribers: &[Subscriber],
    ) -> Result<usize> {
        let listing = self.latest_uploads(channel_id).await?;
        let mut queued = 0;

        for entry in &listing.entries {
            if self.store.is_processed(&entry.id).await? {
                continue;
            }
            if !self
                .store
                .mark_processed(&entry.id, channel_id, Some(&entry.title))
                .await?
            {
                continue;
            }
            info!(channel = %channel_name, title = %entry.title, "New video found");

            for subscriber in subscribers {
                let text = format!(
                    "🔔 New video from {channel_name}\n\n📹 {}\n\n⬇️ Starting download ({})...",
                    entry.title,
                    subscriber.quality.label()
                );
                if !self.notify(subscriber.chat_id, &text).await {
                    continue;
                }
                let job = Job::new(subscriber.chat_id, entry.url.clone())
                    .with_quality(subscriber.quality)
                    .with_label(channel_name);
                self.manager.enqueue_video(job);
                queued += 1;
                info!(chat_id = subscriber.chat_id, title = %entry.title, "Queued auto-download");
            }
        }

        if self.settings.check_live {
            queued += self.check_live(channel_id, channel_name, subscribers).await?;
        }
        Ok(queued)
    }

    async fn check_live(
        &self,
        channel_id: &str,
        channel_name: &str,
        subscribers: &[Subscriber],
    ) -> Result<usize> {
        let Some(info) = self.live_broadcast(channel_id).await else {
            return Ok(0);
        };
        if info.id.is_empty() {
            return Ok(0);
        }
        let key = format!("live_{}", info.id);
        if !self.store.mark_processed(&key, channel_id, Some(&info.title)).await? {
            return Ok(0);
        }
        info!(channel = %channel_name, title = %info.title, "Channel is live");

        let url = info
            .webpage_url
            .clone()
            .unwrap_or_else(|| channel_live_url(channel_id));
        let mut queued = 0;
        for subscriber in subscribers {
            let text = format!("🔴 {channel_name} is live now!\n\n📺 {}\n\n⏺ Recording...", info.title);
            if !self.notify(subscriber.chat_id, &text).await {
                continue;
            }
            let job = Job::new(subscriber.chat_id, url.clone())
                .with_quality(subscriber.quality)
                .with_label(channel_name)
                .live();
            self.manager.enqueue_video(job);
            queued += 1;
        }
        Ok(queued)
    }

    async fn latest_uploads(&self, channel_id: &str) -> Result<Listing> {
        let ctx = self.manager.context();
        let url = channel_videos_url(channel_id);
        let limit = Some(self.settings.latest_per_channel);
        ctx.failover
            .run("list_channel", |route| {
                let extractor = Arc::clone(&ctx.extractor);
                let url = url.clone();
                async move { extractor.list_entries(&url, limit, &route).await }
            })
            .await
            .map_err(Error::from)
    }

    /// Current broadcast of a channel, if it is live.
    async fn live_broadcast(&self, channel_id: &str) -> Option<MediaInfo> {
        let ctx = self.manager.context();
        let url = channel_live_url(channel_id);
        let probed = ctx
            .failover
            .run("live_status", |route| {
                let extractor = Arc::clone(&ctx.extractor);
                let url = url.clone();
                async move { extractor.probe(&url, &route).await }
            })
            .await;
        match probed {
            Ok(info) if info.is_live => Some(info),
            Ok(_) => None,
            Err(e) => {
                debug!(channel_id, error = %e, "Channel is not live");
                None
            }
        }
    }

    async fn notify(&self, chat_id: ChatId, text: &str) -> bool {
        let options = MessageOptions::default();
        let transfer = Arc::clone(&self.transfer);
        match with_flood_retry(&self.retry, "notify_subscriber", || {
            transfer.send_text(chat_id, text, &options)
        })
        .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(chat_id, error = %e, "Failed to notify subscriber");
                false
            }
        }
    }
}

/// Subscriptions grouped by channel, each with its display name and subscribers.
fn group_by_channel(
    subscriptions: &[SubscriptionDbModel],
) -> BTreeMap<String, (String, Vec<Subscriber>)> {
    let mut channels: BTreeMap<String, (String, Vec<Subscriber>)> = BTreeMap::new();
    for sub in subscriptions {
        channels
            .entry(sub.channel_id.clone())
            .or_insert_with(|| (sub.channel_name.clone(), Vec::new()))
            .1
            .push(Subscriber {
                chat_id: sub.chat_id,
                quality: sub.quality(),
            });
    }
    channels
}

/// Sleep for `duration`; `false` when `token` was cancelled first.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
