//! Process configuration.
//!
//! Settings come from environment variables (optionally loaded from `.env`
//! by the binary). [`AppConfig::from_lookup`] is the pure parsing step so the
//! rules can be exercised without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

use tracing::error;

use crate::domain::{ChatId, ProxyList};
use crate::pipeline::PipelineSettings;
use crate::{Error, Result};

/// Public transfer endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org/bot";

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Size ceiling of the public endpoint (50 MiB minus a safety margin).
pub const STANDARD_SIZE_CEILING: u64 = 50 * MIB - MIB;

/// Size ceiling of a privately-hosted endpoint (2000 MiB minus a safety margin).
pub const LOCAL_SIZE_CEILING: u64 = 2000 * MIB - 50 * MIB;

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub api_url: String,
    pub proxy: Option<String>,
    pub proxy_list: Option<String>,
    /// `None` allows every chat.
    pub allowed_chat_ids: Option<Vec<ChatId>>,
    pub max_disk_gb: f64,
    pub subscription_check_interval: Duration,
    pub download_dir: PathBuf,
    pub database_url: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
    pub log_dir: String,
    pub info_timeout: Duration,
    pub playlist_timeout: Duration,
    pub blocking_workers: usize,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token =
            get("BOT_TOKEN").ok_or_else(|| Error::config("BOT_TOKEN is required but not set"))?;

        let allowed_chat_ids = get("ALLOWED_CHAT_IDS").and_then(|raw| {
            match parse_chat_ids(&raw) {
                Ok(ids) => Some(ids),
                Err(e) => {
                    error!(error = %e, "Invalid ALLOWED_CHAT_IDS; allowing all chats");
                    None
                }
            }
        });

        Ok(Self {
            bot_token,
            api_url: get("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            proxy: get("PROXY"),
            proxy_list: get("PROXY_LIST"),
            allowed_chat_ids,
            max_disk_gb: parse_or("MAX_DISK_GB", get("MAX_DISK_GB"), 0.0)?,
            subscription_check_interval: Duration::from_secs(parse_or(
                "SUBSCRIPTION_CHECK_INTERVAL",
                get("SUBSCRIPTION_CHECK_INTERVAL"),
                300,
            )?),
            download_dir: PathBuf::from(
                get("DOWNLOAD_DIR").unwrap_or_else(|| "./downloads".to_string()),
            ),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:data/subscriptions.db?mode=rwc".to_string()),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: get("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
            ytdlp_path: get("YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            log_dir: get("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            info_timeout: Duration::from_secs(parse_or(
                "INFO_TIMEOUT_SECS",
                get("INFO_TIMEOUT_SECS"),
                45,
            )?),
            playlist_timeout: Duration::from_secs(parse_or(
                "PLAYLIST_TIMEOUT_SECS",
                get("PLAYLIST_TIMEOUT_SECS"),
                60,
            )?),
            blocking_workers: parse_or("BLOCKING_WORKERS", get("BLOCKING_WORKERS"), 4usize)?
                .max(1),
        })
    }

    /// Ordered egress routes for the extractor.
    pub fn proxy_list(&self) -> ProxyList {
        ProxyList::from_config(self.proxy.as_deref(), self.proxy_list.as_deref())
    }

    /// Whether the transfer endpoint is a privately-hosted one.
    pub fn is_local_api(&self) -> bool {
        !self.api_url.contains("api.telegram.org")
    }

    /// Maximum artifact size accepted by the active transfer endpoint.
    pub fn size_ceiling(&self) -> u64 {
        if self.is_local_api() {
            LOCAL_SIZE_CEILING
        } else {
            STANDARD_SIZE_CEILING
        }
    }

    /// Disk quota for the download directory; `None` when disabled.
    pub fn disk_quota_bytes(&self) -> Option<u64> {
        if self.max_disk_gb > 0.0 {
            Some((self.max_disk_gb * GIB as f64) as u64)
        } else {
            None
        }
    }

    /// Pipeline tunables derived from this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            download_dir: self.download_dir.clone(),
            disk_quota: self.disk_quota_bytes(),
            info_timeout: self.info_timeout,
            playlist_timeout: self.playlist_timeout,
            blocking_workers: self.blocking_workers,
            ..PipelineSettings::default()
        }
    }

    pub fn is_user_allowed(&self, chat_id: ChatId) -> bool {
        match &self.allowed_chat_ids {
            Some(ids) => ids.contains(&chat_id),
            None => true,
        }
    }
}

fn parse_chat_ids(raw: &str) -> Result<Vec<ChatId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ChatId>()
                .map_err(|e| Error::config(format!("invalid chat id '{s}': {e}")))
        })
        .collect()
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| Error::config(format!("{key} has invalid value '{v}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("BOT_TOKEN", "123:abc")]).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.subscription_check_interval, Duration::from_secs(300));
        assert_eq!(config.info_timeout, Duration::from_secs(45));
        assert_eq!(config.playlist_timeout, Duration::from_secs(60));
        assert_eq!(config.blocking_workers, 4);
        assert_eq!(config.download_dir, PathBuf::from("./downloads"));
        assert!(config.proxy_list().is_direct_only());
        assert_eq!(config.disk_quota_bytes(), None);
        assert!(config.is_user_allowed(1));
    }

    #[test]
    fn test_missing_token_is_error() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_number_is_error() {
        let err = config_from(&[("BOT_TOKEN", "t"), ("INFO_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("INFO_TIMEOUT_SECS"));
    }

    #[test]
    fn test_size_ceiling_by_endpoint() {
        let public = config_from(&[("BOT_TOKEN", "t")]).unwrap();
        assert!(!public.is_local_api());
        assert_eq!(public.size_ceiling(), 49 * 1024 * 1024);

        let local = config_from(&[
            ("BOT_TOKEN", "t"),
            ("API_URL", "http://localhost:8081/bot"),
        ])
        .unwrap();
        assert!(local.is_local_api());
        assert_eq!(local.size_ceiling(), 1950 * 1024 * 1024);
    }

    #[test]
    fn test_disk_quota() {
        let config = config_from(&[("BOT_TOKEN", "t"), ("MAX_DISK_GB", "1.5")]).unwrap();
        assert_eq!(config.disk_quota_bytes(), Some(1536 * 1024 * 1024));
    }

    #[test]
    fn test_allowed_chat_ids() {
        let config = config_from(&[("BOT_TOKEN", "t"), ("ALLOWED_CHAT_IDS", "10, -20")]).unwrap();
        assert!(config.is_user_allowed(10));
        assert!(config.is_user_allowed(-20));
        assert!(!config.is_user_allowed(30));

        let malformed =
            config_from(&[("BOT_TOKEN", "t"), ("ALLOWED_CHAT_IDS", "10,abc")]).unwrap();
        assert!(malformed.is_user_allowed(30));
    }

    #[test]
    fn test_proxy_list_derivation() {
        let config = config_from(&[
            ("BOT_TOKEN", "t"),
            ("PROXY", "http://a:1"),
            ("PROXY_LIST", "http://b:2,http://a:1"),
        ])
        .unwrap();
        assert_eq!(config.proxy_list().len(), 2);
    }
}
