//! `sorter-agent` -- edge daemon for the sorting machine.
//!
//! Bridges the local perception stack to the cloud: ingests frames and
//! detections over a local TCP socket, aggregates detections into
//! grouping windows and uploads them, and polls the job table for
//! lifecycle commands that start and stop the perception services.
//!
//! # Environment variables
//!
//! See [`AgentConfig::from_env`] for the full table; everything has a
//! development default, so a bare `sorter-agent` starts (AWS
//! credentials resolve from the standard chain).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sorter_core::AgentConfig;
use sorter_jobs::{JobController, ModelArtifactCache, ProcessSupervisor, ServiceCommands};
use sorter_pipeline::{
    CropExtractor, DetectionBuffer, FrameAggregator, FrameCache, PerceptionBridge,
    UploadCoordinator, UploaderConfig,
};
use sorter_store::{BlobStore, DynamoMetadataStore, MetadataStore, MetadataTables, S3BlobStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sorter_agent=info,sorter_pipeline=info,sorter_jobs=info,sorter_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        user_id = %config.user_id,
        flush_interval_secs = config.flush_interval.as_secs(),
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting sorter-agent",
    );

    let sdk_config = sorter_store::aws::load_sdk_config().await;

    let blob: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(&sdk_config));
    let meta: Arc<dyn MetadataStore> = Arc::new(DynamoMetadataStore::new(
        &sdk_config,
        MetadataTables {
            jobs: config.jobs_table.clone(),
            frames: config.frames_table.clone(),
            impurities: config.impurities_table.clone(),
        },
    ));

    let cache = Arc::new(FrameCache::new());
    let buffer = Arc::new(DetectionBuffer::default());
    let (send_enabled_tx, send_enabled_rx) = watch::channel(false);

    let uploader = Arc::new(UploadCoordinator::new(
        Arc::clone(&blob),
        Arc::clone(&meta),
        Arc::clone(&cache),
        CropExtractor::new(
            blob,
            Arc::clone(&meta),
            config.impurities_bucket.clone(),
            config.user_id.clone(),
        ),
        UploaderConfig {
            user_id: config.user_id.clone(),
            raw_bucket: config.frames_without_bbox_bucket.clone(),
            annotated_bucket: config.frames_with_bbox_bucket.clone(),
            model_tag: config.model_tag.clone(),
        },
    ));

    let aggregator = FrameAggregator::new(
        Arc::clone(&cache),
        Arc::clone(&buffer),
        uploader,
        send_enabled_rx,
        config.flush_interval,
        config.group_window_ms,
    );

    let supervisor = Arc::new(ProcessSupervisor::new());
    let artifacts = Arc::new(ModelArtifactCache::new(
        config.model_cache_dir.clone(),
        &sdk_config,
    ));
    let controller = JobController::new(
        meta,
        Arc::clone(&supervisor),
        artifacts,
        ServiceCommands {
            camera_bringup: config.camera_launch_cmd.clone(),
            sdm_bridge: config.sdm_launch_cmd.clone(),
        },
        send_enabled_tx,
        config.poll_interval,
    );

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "Failed to bind perception listener");
            std::process::exit(1);
        }
    };

    let bridge = Arc::new(PerceptionBridge::new(Arc::clone(&cache), Arc::clone(&buffer)));

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(aggregator.run(cancel.clone()));
    tasks.spawn(controller.run(cancel.clone()));
    tasks.spawn(bridge.listen(listener, cancel.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, stopping");
    cancel.cancel();
    while tasks.join_next().await.is_some() {}

    // Launched perception processes do not outlive the agent.
    supervisor.shutdown_all().await;

    tracing::info!("sorter-agent stopped");
}
