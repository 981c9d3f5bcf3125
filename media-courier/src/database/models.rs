//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::time::ms_to_datetime;
use crate::domain::{ChatId, Quality};

/// A chat's subscription to a channel.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SubscriptionDbModel {
    pub id: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub chat_id: ChatId,
    /// Quality selector; `-1` is audio-only.
    pub max_quality: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl SubscriptionDbModel {
    pub fn quality(&self) -> Quality {
        Quality::from_selector(self.max_quality)
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        ms_to_datetime(self.created_at)
    }
}

/// Download mode preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    Video,
    Audio,
}

impl DownloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Unknown values fall back to video.
    pub fn parse(s: &str) -> Self {
        match s {
            "audio" => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Per-chat preferences.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UserSettingsDbModel {
    pub chat_id: ChatId,
    pub download_mode: String,
    pub resolution: i64,
}

impl UserSettingsDbModel {
    pub fn defaults(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            download_mode: DownloadMode::Video.as_str().to_string(),
            resolution: i64::from(Quality::DEFAULT_HEIGHT),
        }
    }

    pub fn mode(&self) -> DownloadMode {
        DownloadMode::parse(&self.download_mode)
    }

    /// Quality selector implied by these preferences.
    pub fn quality(&self) -> Quality {
        match self.mode() {
            DownloadMode::Audio => Quality::AudioOnly,
            DownloadMode::Video => Quality::from_selector(self.resolution),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_quality() {
        let mut settings = UserSettingsDbModel::defaults(5);
        assert_eq!(settings.quality(), Quality::MaxHeight(1080));

        settings.resolution = 480;
        assert_eq!(settings.quality(), Quality::MaxHeight(480));

        settings.download_mode = "audio".into();
        assert_eq!(settings.quality(), Quality::AudioOnly);
    }

    #[test]
    fn test_unknown_mode_is_video() {
        assert_eq!(DownloadMode::parse("hologram"), DownloadMode::Video);
    }
}
