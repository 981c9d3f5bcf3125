//! Telegram Bot API transfer endpoint.
//!
//! Text calls are JSON posts; file uploads are streamed multipart posts so a
//! multi-gigabyte part never has to be buffered in memory. Failures are mapped
//! onto [`TransferError`] so the retry policy can tell flood control apart
//! from definitive refusals.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{InlineKeyboard, MessageOptions, Transfer, TransferError, Upload};
use crate::domain::{ChatId, MessageId};

/// `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Caption limit for media messages (UTF-8 characters).
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Timeout for JSON calls; uploads are bounded only by the connect timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API client.
pub struct TelegramTransfer {
    client: Client,
    base_url: String,
    size_ceiling: u64,
}

impl TelegramTransfer {
    /// `api_url` is the method prefix without the token, e.g. `https://api.telegram.org/bot`.
    pub fn new(client: Client, api_url: &str, bot_token: &str, size_ceiling: u64) -> Self {
        Self {
            client,
            base_url: format!("{}{}", api_url.trim_end_matches('/'), bot_token),
            size_ceiling,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call_json(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, TransferError> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransferError::Transient(format!("{method} request failed: {e}")))?;

        Self::read_response(method, response).await
    }

    async fn call_multipart(
        &self,
        method: &str,
        form: Form,
    ) -> Result<Option<serde_json::Value>, TransferError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransferError::Transient(format!("{method} request failed: {e}")))?;

        Self::read_response(method, response).await
    }

    async fn read_response(
        method: &str,
        response: reqwest::Response,
    ) -> Result<Option<serde_json::Value>, TransferError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransferError::Transient(format!("{method} response failed: {e}")))?;

        let parsed: ApiResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if status.is_server_error() => {
                return Err(TransferError::Transient(format!("{method}: HTTP {status}")));
            }
            Err(_) => {
                return Err(TransferError::Transient(format!(
                    "{method}: HTTP {status}: {}",
                    truncate_message(&body, 200)
                )));
            }
        };

        if parsed.ok {
            return Ok(parsed.result);
        }

        debug!(method, status = status.as_u16(), description = ?parsed.description, "Bot API call failed");
        Err(classify_failure(status.as_u16(), &parsed))
    }

    async fn send_media(
        &self,
        method: &str,
        field: &str,
        upload: &Upload,
        streaming: bool,
    ) -> Result<MessageId, TransferError> {
        let mut form = Form::new()
            .text("chat_id", upload.chat_id.to_string())
            .text(
                "caption",
                truncate_message(&upload.caption, TELEGRAM_CAPTION_LIMIT),
            )
            .part(field.to_string(), file_part(&upload.path).await?);

        if streaming {
            form = form.text("supports_streaming", "true");
        }
        if let Some(title) = &upload.title {
            form = form.text("title", title.clone());
        }
        if let Some(reply_to) = upload.reply_to {
            form = form
                .text("reply_to_message_id", reply_to.to_string())
                .text("allow_sending_without_reply", "true");
        }
        if let Some(markup) = &upload.markup {
            let markup = serde_json::to_string(markup)
                .map_err(|e| TransferError::Rejected(format!("invalid markup: {e}")))?;
            form = form.text("reply_markup", markup);
        }
        if let Some(thumb) = upload.thumbnail.as_deref() {
            // A missing thumbnail never blocks the upload.
            if let Ok(part) = file_part(thumb).await {
                form = form.part("thumbnail", part);
            }
        }

        let result = self.call_multipart(method, form).await?;
        Ok(message_id_of(result.as_ref()))
    }
}

/// Map a failed Bot API response onto the retry taxonomy.
fn classify_failure(status: u16, response: &ApiResponse) -> TransferError {
    let description = response
        .description
        .clone()
        .unwrap_or_else(|| format!("HTTP {status}"));

    if let Some(wait) = response.parameters.as_ref().and_then(|p| p.retry_after) {
        return TransferError::RetryAfter(Duration::from_secs(wait));
    }

    let lowered = description.to_lowercase();
    if lowered.contains("flood") || lowered.contains("too many requests") {
        return TransferError::Flood(description);
    }

    if status >= 500 {
        return TransferError::Transient(description);
    }

    TransferError::Rejected(description)
}

fn message_id_of(result: Option<&serde_json::Value>) -> MessageId {
    MessageId(
        result
            .and_then(|r| r.get("message_id"))
            .and_then(|v| v.as_i64())
            .unwrap_or_default(),
    )
}

async fn file_part(path: &Path) -> Result<Part, TransferError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::Rejected(format!("cannot open {}: {e}", path.display())))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| TransferError::Rejected(format!("cannot stat {}: {e}", path.display())))?
        .len();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();

    Ok(Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len).file_name(file_name))
}

/// Truncate a message to fit within a character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "…";
    let truncated: String = text.chars().take(limit - 1).collect();
    format!("{truncated}{suffix}")
}

#[async_trait]
impl Transfer for TelegramTransfer {
    fn size_ceiling(&self) -> u64 {
        self.size_ceiling
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        options: &MessageOptions,
    ) -> Result<MessageId, TransferError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        if let Some(reply_to) = options.reply_to {
            payload["reply_to_message_id"] = json!(reply_to.0);
            payload["allow_sending_without_reply"] = json!(true);
        }
        if let Some(markup) = &options.markup {
            payload["reply_markup"] = json!(markup);
        }

        let result = self.call_json("sendMessage", payload).await?;
        Ok(message_id_of(result.as_ref()))
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message: MessageId,
        text: &str,
        markup: Option<&InlineKeyboard>,
    ) -> Result<(), TransferError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message.0,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = json!(markup);
        }

        match self.call_json("editMessageText", payload).await {
            Ok(_) => Ok(()),
            Err(TransferError::Rejected(desc)) if desc.contains("message is not modified") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message: MessageId,
    ) -> Result<(), TransferError> {
        self.call_json(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message.0 }),
        )
        .await
        .map(|_| ())
    }

    async fn send_video(&self, upload: &Upload) -> Result<MessageId, TransferError> {
        self.send_media("sendVideo", "video", upload, true).await
    }

    async fn send_audio(&self, upload: &Upload) -> Result<MessageId, TransferError> {
        self.send_media("sendAudio", "audio", upload, false).await
    }
}
