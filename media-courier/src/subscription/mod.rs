//! Channel subscriptions: periodic scans that turn new uploads into jobs.

pub mod monitor;

pub use monitor::{MonitorSettings, SubscriptionMonitor, channel_live_url, channel_videos_url};
