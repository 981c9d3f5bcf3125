//! Subscription, dedup and user-settings store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::models::{SubscriptionDbModel, UserSettingsDbModel};
use super::time::now_ms;
use crate::Result;
use crate::domain::ChatId;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Persisted state consumed by the subscription monitor and the chat façade.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    // Subscriptions
    /// Insert or update a subscription. Returns `true` when it is new.
    async fn add_subscription(
        &self,
        channel_id: &str,
        channel_name: &str,
        chat_id: ChatId,
        max_quality: i64,
    ) -> Result<bool>;
    /// Returns `true` when a subscription was removed.
    async fn remove_subscription(&self, channel_id: &str, chat_id: ChatId) -> Result<bool>;
    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionDbModel>>;
    async fn list_subscriptions_for_chat(&self, chat_id: ChatId)
    -> Result<Vec<SubscriptionDbModel>>;

    // Dedup
    async fn is_processed(&self, video_id: &str) -> Result<bool>;
    /// Record `video_id`. Returns `false` when it was already recorded.
    async fn mark_processed(
        &self,
        video_id: &str,
        channel_id: &str,
        title: Option<&str>,
    ) -> Result<bool>;
    /// Delete dedup records older than `days`. Returns the number removed.
    async fn cleanup_processed_older_than(&self, days: u32) -> Result<u64>;

    // User settings
    /// Stored settings, or the defaults when the chat has none.
    async fn get_user_settings(&self, chat_id: ChatId) -> Result<UserSettingsDbModel>;
    async fn update_user_settings(&self, settings: &UserSettingsDbModel) -> Result<()>;
}

/// SQLx implementation of [`SubscriptionStore`].
#[derive(Clone)]
pub struct SqlxSubscriptionStore {
    pool: SqlitePool,
}

impl SqlxSubscriptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for SqlxSubscriptionStore {
    async fn add_subscription(
        &self,
        channel_id: &str,
        channel_name: &str,
        chat_id: ChatId,
        max_quality: i64,
    ) -> Result<bool> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM subscriptions WHERE channel_id = ? AND chat_id = ?",
        )
        .bind(channel_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO subscriptions (channel_id, channel_name, chat_id, max_quality, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (channel_id, chat_id) DO UPDATE SET
                channel_name = excluded.channel_name,
                max_quality = excluded.max_quality
            "#,
        )
        .bind(channel_id)
        .bind(channel_name)
        .bind(chat_id)
        .bind(max_quality)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(existing.is_none())
    }

    async fn remove_subscription(&self, channel_id: &str, chat_id: ChatId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE channel_id = ? AND chat_id = ?")
            .bind(channel_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionDbModel>> {
        let subscriptions = sqlx::query_as::<_, SubscriptionDbModel>(
            "SELECT * FROM subscriptions ORDER BY channel_id, chat_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn list_subscriptions_for_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<SubscriptionDbModel>> {
        let subscriptions = sqlx::query_as::<_, SubscriptionDbModel>(
            "SELECT * FROM subscriptions WHERE chat_id = ? ORDER BY created_at",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    async fn is_processed(&self, video_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM processed_videos WHERE video_id = ?")
                .bind(video_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn mark_processed(
        &self,
        video_id: &str,
        channel_id: &str,
        title: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_videos (video_id, channel_id, title, processed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(video_id)
        .bind(channel_id)
        .bind(title)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_processed_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = now_ms() - i64::from(days) * MS_PER_DAY;
        let result = sqlx::query("DELETE FROM processed_videos WHERE processed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_user_settings(&self, chat_id: ChatId) -> Result<UserSettingsDbModel> {
        let settings = sqlx::query_as::<_, UserSettingsDbModel>(
            "SELECT chat_id, download_mode, resolution FROM user_settings WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings.unwrap_or_else(|| UserSettingsDbModel::defaults(chat_id)))
    }

    async fn update_user_settings(&self, settings: &UserSettingsDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (chat_id, download_mode, resolution)
            VALUES (?, ?, ?)
            ON CONFLICT (chat_id) DO UPDATE SET
                download_mode = excluded.download_mode,
                resolution = excluded.resolution
            "#,
        )
        .bind(settings.chat_id)
        .bind(&settings.download_mode)
        .bind(settings.resolution)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_subscription_upsert_and_remove() {
        let store = SqlxSubscriptionStore::new(test_pool().await);

        assert!(store.add_subscription("UC1", "One", 10, 1080).await.unwrap());
        assert!(!store.add_subscription("UC1", "One renamed", 10, 720).await.unwrap());
        assert!(store.add_subscription("UC1", "One", 11, -1).await.unwrap());

        let all = store.list_subscriptions().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].channel_name, "One renamed");
        assert_eq!(all[0].max_quality, 720);

        let mine = store.list_subscriptions_for_chat(11).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].quality(), crate::domain::Quality::AudioOnly);

        assert!(store.remove_subscription("UC1", 10).await.unwrap());
        assert!(!store.remove_subscription("UC1", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_processed_dedup() {
        let store = SqlxSubscriptionStore::new(test_pool().await);

        assert!(!store.is_processed("v1").await.unwrap());
        assert!(store.mark_processed("v1", "UC1", Some("Title")).await.unwrap());
        assert!(!store.mark_processed("v1", "UC1", None).await.unwrap());
        assert!(store.is_processed("v1").await.unwrap());

        assert_eq!(store.cleanup_processed_older_than(30).await.unwrap(), 0);
        assert!(store.is_processed("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_user_settings_defaults_and_update() {
        let store = SqlxSubscriptionStore::new(test_pool().await);

        let settings = store.get_user_settings(3).await.unwrap();
        assert_eq!(settings, UserSettingsDbModel::defaults(3));

        let updated = UserSettingsDbModel {
            chat_id: 3,
            download_mode: "audio".into(),
            resolution: 720,
        };
        store.update_user_settings(&updated).await.unwrap();
        assert_eq!(store.get_user_settings(3).await.unwrap(), updated);
    }
}
