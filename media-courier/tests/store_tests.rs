//! Integration tests for the SQLite store and the subscription monitor.

mod common;

use std::sync::Arc;

use common::*;
use media_courier::database::{
    DbPool, SqlxSubscriptionStore, SubscriptionStore, init_pool, run_migrations,
};
use media_courier::domain::{ProxyList, Quality};
use media_courier::extractor::{Listing, ListingEntry, MediaInfo};
use media_courier::pipeline::PipelineManager;
use media_courier::subscription::{MonitorSettings, SubscriptionMonitor};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

async fn memory_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    run_migrations(&pool).await.expect("run migrations");
    pool
}

fn listing(ids: &[&str]) -> Listing {
    Listing {
        id: "UC1".into(),
        title: "Channel".into(),
        entries: ids
            .iter()
            .map(|id| ListingEntry {
                id: (*id).into(),
                title: format!("Upload {id}"),
                url: format!("https://www.youtube.com/watch?v={id}"),
            })
            .collect(),
    }
}

mod store_tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_persists_across_pools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("data/bot.db").display());

        let pool = init_pool(&url).await.expect("init pool");
        run_migrations(&pool).await.expect("migrate");
        let store = SqlxSubscriptionStore::new(pool.clone());
        store
            .add_subscription("UC1", "One", 7, 720)
            .await
            .expect("add subscription");
        store
            .mark_processed("v1", "UC1", Some("First"))
            .await
            .expect("mark processed");
        pool.close().await;

        let pool = init_pool(&url).await.expect("reopen pool");
        run_migrations(&pool).await.expect("migrations are idempotent");
        let store = SqlxSubscriptionStore::new(pool);
        let subscriptions = store.list_subscriptions().await.expect("list");
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].quality(), Quality::MaxHeight(720));
        assert!(store.is_processed("v1").await.expect("is processed"));
    }

    #[tokio::test]
    async fn test_subscriptions_are_unique_per_chat() {
        let store = SqlxSubscriptionStore::new(memory_pool().await);

        assert!(store.add_subscription("UC1", "One", 1, 1080).await.unwrap());
        assert!(store.add_subscription("UC1", "One", 2, 1080).await.unwrap());
        assert!(!store.add_subscription("UC1", "One", 2, 480).await.unwrap());

        let for_two = store.list_subscriptions_for_chat(2).await.unwrap();
        assert_eq!(for_two.len(), 1);
        assert_eq!(for_two[0].max_quality, 480);
        assert!(for_two[0].created().is_some());
    }
}

mod monitor_tests {
    use super::*;

    fn monitor(
        store: Arc<dyn SubscriptionStore>,
        extractor: Arc<FakeExtractor>,
        transfer: Arc<FakeTransfer>,
        dir: &std::path::Path,
    ) -> (SubscriptionMonitor, Arc<PipelineManager>) {
        let manager = Arc::new(PipelineManager::new(
            extractor,
            Arc::new(FakeTranscoder::new()),
            transfer,
            ProxyList::direct(),
            settings(dir),
            CancellationToken::new(),
        ));
        let monitor = SubscriptionMonitor::new(store, Arc::clone(&manager), MonitorSettings::default());
        (monitor, manager)
    }

    #[tokio::test]
    async fn test_new_uploads_are_queued_once() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SubscriptionStore> =
            Arc::new(SqlxSubscriptionStore::new(memory_pool().await));
        let extractor = FakeExtractor::new();
        *extractor.listing.lock() = listing(&["a", "b"]);
        let transfer = FakeTransfer::new(50 * MB);
        let (monitor, manager) = monitor(store.clone(), extractor, transfer.clone(), dir.path());

        let queued = monitor
            .check_channel_now("UC1", "Channel", 9, Quality::MaxHeight(720))
            .await
            .unwrap();
        assert_eq!(queued, 2);
        assert_eq!(manager.video_queue_depth(), 2);
        assert!(store.is_processed("a").await.unwrap());

        let again = monitor
            .check_channel_now("UC1", "Channel", 9, Quality::MaxHeight(720))
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(manager.video_queue_depth(), 2);

        let texts = transfer.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(
            texts[0],
            "🔔 New video from Channel\n\n📹 Upload a\n\n⬇️ Starting download (720p)..."
        );
    }

    #[tokio::test]
    async fn test_scan_fans_out_to_every_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SubscriptionStore> =
            Arc::new(SqlxSubscriptionStore::new(memory_pool().await));
        store.add_subscription("UC1", "Channel", 1, 1080).await.unwrap();
        store.add_subscription("UC1", "Channel", 2, -1).await.unwrap();

        let extractor = FakeExtractor::new();
        *extractor.listing.lock() = listing(&["x"]);
        let transfer = FakeTransfer::new(50 * MB);
        let (monitor, manager) = monitor(store, extractor, transfer, dir.path());

        let queued = monitor.scan(&CancellationToken::new()).await;
        assert_eq!(queued, 2);
        assert_eq!(manager.video_queue_depth(), 2);
    }

    #[tokio::test]
    async fn test_live_channel_is_queued_once() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SubscriptionStore> =
            Arc::new(SqlxSubscriptionStore::new(memory_pool().await));
        let extractor = FakeExtractor::new();
        *extractor.probe.lock() = Ok(MediaInfo {
            id: "stream1".into(),
            title: "Live now".into(),
            is_live: true,
            ..Default::default()
        });
        let transfer = FakeTransfer::new(50 * MB);
        let (monitor, manager) = monitor(store.clone(), extractor, transfer.clone(), dir.path());

        let queued = monitor
            .check_channel_now("UC1", "Channel", 3, Quality::MaxHeight(1080))
            .await
            .unwrap();
        assert_eq!(queued, 1);
        assert!(store.is_processed("live_stream1").await.unwrap());
        assert!(transfer.texts()[0].starts_with("🔴 Channel is live now!"));

        let again = monitor
            .check_channel_now("UC1", "Channel", 3, Quality::MaxHeight(1080))
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(manager.video_queue_depth(), 1);
    }
}
