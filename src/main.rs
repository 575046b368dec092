use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use watchpost::api::rest::{AppState, RestApi};
use watchpost::clients::{
    ExternalScheduler, PresignClient, SchedulerClient, StreamRegistry, StreamRegistryClient,
    UploadIssuer,
};
use watchpost::config;
use watchpost::db::repositories::{
    EntriesRepository, EntryStore, LocationStore, LocationsRepository, VideoStore,
    VideosRepository,
};
use watchpost::db::DatabaseService;
use watchpost::ingest::EntryIngestionPipeline;
use watchpost::lifecycle::LifecycleService;
use watchpost::messaging::{JobQueue, RabbitMqJobQueue};
use watchpost::sync::RecordingScheduleSynchronizer;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.api.log_level.clone())),
        )
        .init();

    info!("Starting watchpost entry and recording backend");

    let database = DatabaseService::new(&config.database).await?;
    let pool = database.pool.clone();

    let locations: Arc<dyn LocationStore> = Arc::new(LocationsRepository::new(pool.clone()));
    let entries: Arc<dyn EntryStore> = Arc::new(EntriesRepository::new(pool.clone()));
    let videos: Arc<dyn VideoStore> = Arc::new(VideosRepository::new(pool));

    let queue: Arc<dyn JobQueue> =
        Arc::new(RabbitMqJobQueue::new(config.message_broker.clone()).await?);
    info!("Message broker initialized");

    let scheduler: Arc<dyn ExternalScheduler> = Arc::new(SchedulerClient::new(&config.scheduler)?);
    let streams: Arc<dyn StreamRegistry> =
        Arc::new(StreamRegistryClient::new(&config.stream_registry)?);
    let uploads: Arc<dyn UploadIssuer> = Arc::new(PresignClient::new(&config.upload)?);

    let default_timezone: Tz = config
        .ingest
        .default_timezone
        .parse()
        .map_err(|e| anyhow!("Unknown default timezone {:?}: {}", config.ingest.default_timezone, e))?;

    let pipeline = Arc::new(EntryIngestionPipeline::new(
        locations.clone(),
        entries.clone(),
        videos.clone(),
        uploads,
        queue.clone(),
        config.message_broker.capture_topic.clone(),
    ));

    let lifecycle = Arc::new(LifecycleService::new(
        entries,
        videos,
        queue,
        config.message_broker.processing_topic.clone(),
    ));

    let synchronizer = Arc::new(RecordingScheduleSynchronizer::new(
        locations.clone(),
        scheduler,
        streams,
        config.scheduler.clone(),
    ));

    let state = AppState {
        pipeline,
        lifecycle,
        synchronizer,
        locations,
        default_timezone,
    };

    let server = RestApi::new(&config.api, state);
    server.run().await?;

    Ok(())
}
