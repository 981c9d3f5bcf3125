//! Job orchestration for fetch-and-deliver work.
//!
//! The pipeline is responsible for:
//! - Two FIFO queues (single videos, playlists), each drained by one worker loop
//! - Cooperative cancellation keyed by job identifier
//! - Route failover around extractor calls
//! - Rate-limited status messages
//! - Splitting oversized artifacts and delivering them with flood-control retry
//! - Supervising live-stream captures on their own tasks

pub mod cancellation;
pub mod context;
pub mod delivery;
pub mod fetch;
pub mod job_queue;
pub mod live_capture;
pub mod manager;
pub mod playlist_worker;
pub mod progress;
pub mod splitter;
pub mod video_worker;
pub mod worker_pool;

pub use cancellation::{ActiveJob, CancellationRegistry, JobCancellation};
pub use context::{PipelineContext, PipelineSettings};
pub use delivery::{ArtifactSet, DeliveryPipeline, DeliveryReport, DeliveryTarget, PartFailure};
pub use fetch::{FetchError, ProxyFailover, is_restricted};
pub use job_queue::{JobQueue, QueueConsumer, QueueKind};
pub use live_capture::{LiveCaptures, LiveOutcome, LiveSupervisor, select_pending};
pub use manager::PipelineManager;
pub use playlist_worker::{PlaylistSummary, PlaylistWorker};
pub use progress::{ProgressReporter, ProgressSink, ProgressUpdate};
pub use splitter::{OutputSplitter, SplitOutcome, part_count, segment_seconds};
pub use video_worker::{JobOutcome, VideoWorker};
pub use worker_pool::BlockingPool;
