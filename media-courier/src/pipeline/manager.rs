//! Pipeline Manager: the producer-facing façade of the engine.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{PipelineContext, PipelineSettings};
use super::job_queue::{JobQueue, QueueKind};
use super::live_capture::LiveCaptures;
use super::playlist_worker::PlaylistWorker;
use super::video_worker::VideoWorker;
use crate::domain::{Job, JobId, ProxyList};
use crate::extractor::Extractor;
use crate::transcoder::Transcoder;
use crate::transfer::Transfer;

/// Owns the queues, the worker loops and the live captures.
pub struct PipelineManager {
    ctx: Arc<PipelineContext>,
    video_queue: JobQueue,
    playlist_queue: JobQueue,
    live: Arc<LiveCaptures>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl PipelineManager {
    /// Create a manager. Cancelling `cancellation_token` stops everything.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        transfer: Arc<dyn Transfer>,
        routes: ProxyList,
        settings: PipelineSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        info!(
            routes = routes.len(),
            size_ceiling_mb = transfer.size_ceiling() / (1024 * 1024),
            disk_quota = ?settings.disk_quota,
            "Creating pipeline manager"
        );
        let ctx = PipelineContext::new(
            extractor,
            transcoder,
            transfer,
            routes,
            settings,
            cancellation_token.clone(),
        );
        Self {
            ctx: Arc::new(ctx),
            video_queue: JobQueue::new(QueueKind::Video),
            playlist_queue: JobQueue::new(QueueKind::Playlist),
            live: Arc::new(LiveCaptures::new()),
            cancellation_token,
            tasks: parking_lot::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Queue a single video (or live) job. Returns the advisory queue depth.
    pub fn enqueue_video(&self, mut job: Job) -> usize {
        let job_id = JobId::of_job(&job);
        job.id = Some(job_id.clone());
        info!(%job_id, chat_id = job.chat_id, url = %job.url, "Video job enqueued");
        self.video_queue.push(job)
    }

    /// Queue a playlist job. Returns the advisory queue depth.
    pub fn enqueue_playlist(&self, mut job: Job) -> usize {
        let job_id = JobId::of_playlist(&job);
        job.id = Some(job_id.clone());
        info!(%job_id, chat_id = job.chat_id, url = %job.url, "Playlist job enqueued");
        self.playlist_queue.push(job)
    }

    pub fn video_queue_depth(&self) -> usize {
        self.video_queue.depth()
    }

    pub fn playlist_queue_depth(&self) -> usize {
        self.playlist_queue.depth()
    }

    /// Request cancellation of a running job. Returns `false` when no job
    /// with that identifier is active.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let marked = self.ctx.registry.mark(job_id);
        if marked {
            info!(job_id = %job_id, "Cancellation requested");
        } else {
            debug!(job_id = %job_id, "Cancellation requested for unknown job");
        }
        marked
    }

    pub fn active_live_captures(&self) -> usize {
        self.live.active_count()
    }

    /// Start both worker loops.
    pub fn start(&self) {
        let mut guard = self.tasks.lock();
        if guard.is_some() {
            warn!("Pipeline manager already started");
            return;
        }

        let mut tasks = JoinSet::new();

        match self.video_queue.take_consumer() {
            Some(consumer) => {
                let worker = VideoWorker::new(Arc::clone(&self.ctx), Arc::clone(&self.live));
                tasks.spawn(worker.run(consumer, self.cancellation_token.clone()));
            }
            None => error!("Video queue consumer already taken"),
        }

        match self.playlist_queue.take_consumer() {
            Some(consumer) => {
                let worker = PlaylistWorker::new(Arc::clone(&self.ctx));
                tasks.spawn(worker.run(consumer, self.cancellation_token.clone()));
            }
            None => error!("Playlist queue consumer already taken"),
        }

        *guard = Some(tasks);
        info!("Pipeline manager started");
    }

    /// Cancel everything and wait for the worker loops and live captures.
    pub async fn stop(&self) {
        info!("Stopping pipeline manager");
        self.cancellation_token.cancel();

        let tasks = self.tasks.lock().take();
        if let Some(mut tasks) = tasks {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Worker loop panicked");
                }
            }
        }

        self.live.join_all().await;
        info!("Pipeline manager stopped");
    }
}
