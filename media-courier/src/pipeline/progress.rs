//! Download progress plumbing and the per-job status message.
//!
//! [`ProgressSink`] is handed to the extractor and only ever `try_send`s, so a
//! slow chat endpoint never stalls the download. The job's worker drains the
//! channel and feeds a [`ProgressReporter`], which owns the status message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{ChatId, JobId, MessageId};
use crate::transfer::{
    FloodRetryPolicy, InlineButton, InlineKeyboard, MessageOptions, Transfer, with_flood_retry,
};

/// Minimum interval between non-forced status updates.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(20);

/// Capacity of the extractor -> worker progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// One progress tick from the extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub percent: Option<f64>,
    /// Human readable speed, as reported by the extractor.
    pub speed: Option<String>,
    /// Human readable ETA, as reported by the extractor.
    pub eta: Option<String>,
}

impl ProgressUpdate {
    pub fn percent_text(&self) -> String {
        match self.percent {
            Some(p) => format!("{p:.1}%"),
            None => "?%".to_string(),
        }
    }

    pub fn eta_text(&self) -> &str {
        self.eta.as_deref().unwrap_or("?")
    }
}

/// Sending half of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    /// A connected sink and its receiver.
    pub fn channel() -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Publish an update; dropped when the channel is full or closed.
    pub fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.try_send(update);
    }
}

/// Owner of one job's status message.
///
/// Creates the message on first use and edits it in place afterwards.
/// Non-forced updates are rate limited, identical text is never re-sent, and
/// failures are logged and swallowed.
pub struct ProgressReporter {
    transfer: Arc<dyn Transfer>,
    retry: FloodRetryPolicy,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    job_id: JobId,
    message: Option<MessageId>,
    last_text: Option<String>,
    last_sent: Option<Instant>,
    min_interval: Duration,
}

impl ProgressReporter {
    pub fn new(transfer: Arc<dyn Transfer>, chat_id: ChatId, job_id: JobId) -> Self {
        Self {
            transfer,
            retry: FloodRetryPolicy::default(),
            chat_id,
            reply_to: None,
            job_id,
            message: None,
            last_text: None,
            last_sent: None,
            min_interval: MIN_REPORT_INTERVAL,
        }
    }

    /// Reply to this message when the status message is created.
    pub fn with_reply_to(mut self, reply_to: Option<MessageId>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Reuse a status message created by the caller.
    pub fn with_existing_message(mut self, message: Option<MessageId>) -> Self {
        self.message = message;
        self
    }

    pub fn with_retry_policy(mut self, retry: FloodRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn message(&self) -> Option<MessageId> {
        self.message
    }

    /// Update the status message. Returns whether anything was sent.
    pub async fn report(&mut self, text: &str, force: bool, show_cancel: bool) -> bool {
        if !force
            && self
                .last_sent
                .is_some_and(|sent| sent.elapsed() < self.min_interval)
        {
            return false;
        }

        if self.last_text.as_deref() == Some(text) {
            return false;
        }

        let markup = if show_cancel {
            InlineButton::callback("❌ Cancel", format!("cancel:{}", self.job_id))
                .map(InlineKeyboard::single)
        } else {
            None
        };

        let transfer = Arc::clone(&self.transfer);
        let chat_id = self.chat_id;

        let outcome = match self.message {
            Some(message) => {
                with_flood_retry(&self.retry, "edit_status", || {
                    transfer.edit_text(chat_id, message, text, markup.as_ref())
                })
                .await
            }
            None => {
                let options = MessageOptions {
                    reply_to: self.reply_to,
                    markup: markup.clone(),
                };
                match with_flood_retry(&self.retry, "send_status", || {
                    transfer.send_text(chat_id, text, &options)
                })
                .await
                {
                    Ok(message) => {
                        self.message = Some(message);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.last_text = Some(text.to_string());
                self.last_sent = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Failed to update status");
                false
            }
        }
    }

    /// Delete the status message, if one exists.
    pub async fn delete(&mut self) {
        let Some(message) = self.message.take() else {
            return;
        };
        let transfer = Arc::clone(&self.transfer);
        let chat_id = self.chat_id;
        if let Err(e) = with_flood_retry(&self.retry, "delete_status", || {
            transfer.delete_message(chat_id, message)
        })
        .await
        {
            debug!(job_id = %self.job_id, error = %e, "Failed to delete status message");
        }
        self.last_text = None;
    }
}
