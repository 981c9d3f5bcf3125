use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use media_courier::config::AppConfig;
use media_courier::database::{self, SqlxSubscriptionStore};
use media_courier::extractor::YtDlpExtractor;
use media_courier::logging::init_logging;
use media_courier::pipeline::PipelineManager;
use media_courier::subscription::{MonitorSettings, SubscriptionMonitor};
use media_courier::transcoder::FfmpegTranscoder;
use media_courier::transfer::TelegramTransfer;
use media_courier::utils::{fs, http_client};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    let logging = init_logging(&config.log_dir)?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.child_token());

    http_client::install_rustls_provider();

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    // Jobs are not durable; anything left from a previous run is garbage.
    fs::ensure_dir_all_with_op("creating download directory", &config.download_dir).await?;
    let stale = fs::clear_files(&config.download_dir).await?;
    if stale > 0 {
        tracing::info!(removed = stale, "Removed leftover files from download directory");
    }

    let transcoder = FfmpegTranscoder::detect(&config.ffmpeg_path, &config.ffprobe_path).await;
    let mut extractor = YtDlpExtractor::new(&config.ytdlp_path);
    if config.ffmpeg_path != "ffmpeg" {
        extractor = extractor.with_ffmpeg_location(&config.ffmpeg_path);
    }
    let client = http_client::build_transfer_client(Duration::from_secs(30))?;
    let transfer = TelegramTransfer::new(
        client,
        &config.api_url,
        &config.bot_token,
        config.size_ceiling(),
    );

    let manager = Arc::new(PipelineManager::new(
        Arc::new(extractor),
        Arc::new(transcoder),
        Arc::new(transfer),
        config.proxy_list(),
        config.pipeline_settings(),
        shutdown.clone(),
    ));
    manager.start();

    let store = Arc::new(SqlxSubscriptionStore::new(pool.clone()));
    let monitor = Arc::new(SubscriptionMonitor::new(
        store,
        Arc::clone(&manager),
        MonitorSettings {
            interval: config.subscription_check_interval,
            ..MonitorSettings::default()
        },
    ));
    let monitor_task = monitor.start(shutdown.child_token());

    tracing::info!(
        download_dir = %config.download_dir.display(),
        local_api = config.is_local_api(),
        "media-courier initialized successfully"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    manager.stop().await;
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "Subscription monitor task failed");
    }
    pool.close().await;

    tracing::info!("media-courier stopped");
    Ok(())
}
