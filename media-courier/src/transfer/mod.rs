//! Transfer capability: delivering messages and files to a chat.
//!
//! The pipeline only needs message identity, edit/delete, a size ceiling and a
//! flood-control signal; [`Transfer`] exposes exactly that. [`telegram`] holds
//! the Bot API implementation and [`retry`] the flood-control retry policy
//! every call is wrapped in.

pub mod retry;
pub mod telegram;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{ChatId, MessageId};

pub use retry::{FloodRetryPolicy, with_flood_retry};
pub use telegram::TelegramTransfer;

/// Maximum length of inline button callback data, in bytes.
pub const CALLBACK_DATA_LIMIT: usize = 64;

/// Failure of a single transfer call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Flood control with an explicit wait.
    #[error("flood control: retry after {}s", .0.as_secs())]
    RetryAfter(Duration),

    /// Flood control signalled only in the error text.
    #[error("flood control: {0}")]
    Flood(String),

    /// Definitive refusal by the endpoint; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Unclassified failure (network, server error).
    #[error("{0}")]
    Transient(String),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },
}

/// One inline button carrying callback data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    /// Build a callback button; `None` when the data exceeds [`CALLBACK_DATA_LIMIT`].
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Option<Self> {
        let data = data.into();
        if data.len() > CALLBACK_DATA_LIMIT {
            return None;
        }
        Some(Self {
            text: text.into(),
            callback_data: data,
        })
    }
}

/// Inline keyboard markup attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Keyboard with a single button.
    pub fn single(button: InlineButton) -> Self {
        Self {
            inline_keyboard: vec![vec![button]],
        }
    }
}

/// Options for a text message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    pub reply_to: Option<MessageId>,
    pub markup: Option<InlineKeyboard>,
}

/// A file delivery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub chat_id: ChatId,
    pub path: PathBuf,
    pub caption: String,
    pub reply_to: Option<MessageId>,
    pub markup: Option<InlineKeyboard>,
    pub thumbnail: Option<PathBuf>,
    pub title: Option<String>,
}

impl Upload {
    pub fn new(chat_id: ChatId, path: impl Into<PathBuf>, caption: impl Into<String>) -> Self {
        Self {
            chat_id,
            path: path.into(),
            caption: caption.into(),
            reply_to: None,
            markup: None,
            thumbnail: None,
            title: None,
        }
    }
}

/// The size-limited delivery endpoint.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Maximum artifact size accepted by this endpoint, in bytes.
    fn size_ceiling(&self) -> u64;

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &MessageOptions,
    ) -> Result<MessageId, TransferError>;

    /// Replace the text (and markup) of an existing message.
    async fn edit_text(
        &self,
        chat_id: ChatId,
        message: MessageId,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<(), TransferError>;

    async fn delete_message(&self, chat_id: ChatId, message: MessageId)
    -> Result<(), TransferError>;

    async fn send_video(&self, upload: &Upload) -> Result<MessageId, TransferError>;

    async fn send_audio(&self, upload: &Upload) -> Result<MessageId, TransferError>;
}
