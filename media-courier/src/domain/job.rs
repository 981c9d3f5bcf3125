//! Queued job records and their identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Chat (recipient) identity on the transfer endpoint.
pub type ChatId = i64;

/// Identity of a message on the transfer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quality selector for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Video no taller than the given height.
    MaxHeight(u32),
    /// Audio-only artifact.
    AudioOnly,
}

impl Quality {
    /// Height used when nothing else is configured.
    pub const DEFAULT_HEIGHT: u32 = 1080;

    /// Sentinel used by persisted settings and chat commands for audio-only.
    pub const AUDIO_ONLY_SENTINEL: i64 = -1;

    /// Build a selector from its persisted integer form.
    ///
    /// `-1` selects audio-only; other non-positive values fall back to the default height.
    pub fn from_selector(value: i64) -> Self {
        if value == Self::AUDIO_ONLY_SENTINEL {
            Self::AudioOnly
        } else if value <= 0 {
            Self::MaxHeight(Self::DEFAULT_HEIGHT)
        } else {
            Self::MaxHeight(u32::try_from(value).unwrap_or(Self::DEFAULT_HEIGHT))
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::AudioOnly)
    }

    /// Height ceiling passed to the extractor (audio-only still needs one for fallbacks).
    pub fn height_ceiling(&self) -> u32 {
        match self {
            Self::MaxHeight(h) => *h,
            Self::AudioOnly => Self::DEFAULT_HEIGHT,
        }
    }

    /// Short user-facing mode label.
    pub fn label(&self) -> String {
        match self {
            Self::MaxHeight(h) => format!("{h}p"),
            Self::AudioOnly => "🎵 Audio".to_string(),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::MaxHeight(Self::DEFAULT_HEIGHT)
    }
}

/// One queued unit of fetch-and-deliver work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Identifier stamped when the job is enqueued. Jobs handed straight to a
    /// worker get one when processing starts.
    pub id: Option<JobId>,
    /// Destination chat.
    pub chat_id: ChatId,
    /// Source URL.
    pub url: String,
    /// Originating message; `None` for subscription-triggered jobs.
    pub reply_to: Option<MessageId>,
    /// Quality selector.
    pub quality: Quality,
    /// Status message already created by the caller, reused instead of sending a new one.
    pub status_message: Option<MessageId>,
    /// Display label (e.g. channel name).
    pub label: Option<String>,
    /// Source is known to be a live stream.
    pub is_live: bool,
}

impl Job {
    pub fn new(chat_id: ChatId, url: impl Into<String>) -> Self {
        Self {
            id: None,
            chat_id,
            url: url.into(),
            reply_to: None,
            quality: Quality::default(),
            status_message: None,
            label: None,
            is_live: false,
        }
    }

    /// Use a caller-chosen identifier, e.g. one already shown on a cancel button.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_reply_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_status_message(mut self, message: MessageId) -> Self {
        self.status_message = Some(message);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn live(mut self) -> Self {
        self.is_live = true;
        self
    }
}

static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Identifier of a running job.
///
/// Used as the cancellation key and as the filename namespace for the job's
/// artifacts. The trailing sequence number makes identifiers unique for the
/// lifetime of the process even for jobs enqueued within the same second.
/// The timestamp records when the job was enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Identifier for a single-video or live job.
    pub fn for_job(job: &Job) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            job.chat_id,
            job.reply_to
                .map(|m| m.to_string())
                .unwrap_or_else(|| "auto".to_string()),
            chrono::Utc::now().timestamp(),
            JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Identifier for a playlist job.
    pub fn for_playlist(job: &Job) -> Self {
        Self(format!("pl_{}", Self::for_job(job).0))
    }

    /// The job's stamped identifier, or a fresh single-video one.
    pub fn of_job(job: &Job) -> Self {
        job.id.clone().unwrap_or_else(|| Self::for_job(job))
    }

    /// The job's stamped identifier, or a fresh playlist one.
    pub fn of_playlist(job: &Job) -> Self {
        job.id.clone().unwrap_or_else(|| Self::for_playlist(job))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a file name belongs to this job's artifact namespace.
    ///
    /// Artifacts are named `<id>.<ext>` or `<id>_<suffix>`.
    pub fn owns_file_name(&self, name: &str) -> bool {
        match name.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.starts_with('.') || rest.starts_with('_'),
            None => false,
        }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
