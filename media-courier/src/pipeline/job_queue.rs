//! FIFO job queues feeding the worker loops.
//!
//! Unbounded by design of the producer contract: enqueue never blocks and
//! only an advisory depth is reported back.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Job;

/// Which queue a job lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Video,
    Playlist,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueKind::Video => write!(f, "video"),
            QueueKind::Playlist => write!(f, "playlist"),
        }
    }
}

/// Multi-producer, single-consumer job queue.
pub struct JobQueue {
    kind: QueueKind,
    tx: mpsc::UnboundedSender<Job>,
    rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new(kind: QueueKind) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            kind,
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Append a job. Returns the queue depth including this job.
    pub fn push(&self, job: Job) -> usize {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(job).is_err() {
            // Consumer is gone; the job will never run.
            self.depth.fetch_sub(1, Ordering::SeqCst);
            debug!(queue = %self.kind, "Queue closed, job dropped");
            return self.depth();
        }
        debug!(queue = %self.kind, depth, "Job enqueued");
        depth
    }

    /// Jobs waiting to be picked up.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Take the single consumer. `None` once taken.
    pub fn take_consumer(&self) -> Option<QueueConsumer> {
        self.rx.lock().take().map(|rx| QueueConsumer {
            kind: self.kind,
            rx,
            depth: Arc::clone(&self.depth),
        })
    }
}

/// Receiving half of a [`JobQueue`].
pub struct QueueConsumer {
    kind: QueueKind,
    rx: mpsc::UnboundedReceiver<Job>,
    depth: Arc<AtomicUsize>,
}

impl QueueConsumer {
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Next job in submission order; `None` when every producer is gone.
    pub async fn next(&mut self) -> Option<Job> {
        let job = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_depth() {
        let queue = JobQueue::new(QueueKind::Video);
        assert_eq!(queue.push(Job::new(1, "a")), 1);
        assert_eq!(queue.push(Job::new(1, "b")), 2);
        assert_eq!(queue.push(Job::new(2, "c")), 3);

        let mut consumer = queue.take_consumer().unwrap();
        assert!(queue.take_consumer().is_none());

        assert_eq!(consumer.next().await.unwrap().url, "a");
        assert_eq!(queue.depth(), 2);
        assert_eq!(consumer.next().await.unwrap().url, "b");
        assert_eq!(consumer.next().await.unwrap().url, "c");
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_push_after_consumer_dropped() {
        let queue = JobQueue::new(QueueKind::Playlist);
        drop(queue.take_consumer());
        assert_eq!(queue.push(Job::new(1, "a")), 0);
    }
}
