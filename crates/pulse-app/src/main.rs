//! Pulse application binary - composition root.
//!
//! Ties together all Pulse crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open storage (SQLite with migrations)
//! 3. Choose the embedding and text-generation providers
//! 4. Either run the background services (clustering workers,
//!    reconciliation, retention) or execute one operator command

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::sync::Notify;

use pulse_core::config::{PulseConfig, RetentionConfig};
use pulse_core::types::{hours_before, NewChannel};
use pulse_insight::reconcile::recluster_pending;
use pulse_insight::{
    ChannelClassifier, ClusterQueue, ClusterWorkerPool, ClusteringEngine, DigestAggregator,
    DigestRequest, HttpChannelClassifier, HttpMetadataGenerator, HttpNarrativeGenerator,
    IncomingPost, IngestOutcome, Ingestor, InsightError, MetadataGenerator, PlaceholderMetadata,
    Reconciler,
};
use pulse_storage::{
    ChannelCache, ChannelRepository, Database, RetentionSweep, SqliteStoryStore, StoryStore,
    SubscriptionRepository,
};
use pulse_vector::embedding::{DynEmbeddingService, HttpEmbeddingService, MockEmbedding};

use cli::{CliArgs, Command, DigestArgs, IngestArgs, SubscriptionArgs};

/// Shared services built once per process.
struct Services {
    config: PulseConfig,
    db: Arc<Database>,
    store: Arc<SqliteStoryStore>,
    engine: Arc<ClusteringEngine>,
    classifier: Option<Arc<dyn ChannelClassifier>>,
}

impl Services {
    fn open(config: PulseConfig, data_dir: PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let db_path = data_dir.join("pulse.db");
        let db = Arc::new(Database::new(&db_path)?);
        tracing::info!(path = %db_path.display(), "SQLite database opened");

        let store = Arc::new(SqliteStoryStore::new(Arc::clone(&db)));
        let engine = Arc::new(ClusteringEngine::new(
            store.clone(),
            build_embedder(&config)?,
            build_metadata(&config)?,
            config.clustering.clone(),
        ));
        tracing::info!(
            mode = ?config.clustering.mode,
            threshold = config.clustering.similarity_threshold,
            "Clustering engine ready"
        );

        let classifier = build_classifier(&config)?;

        Ok(Self {
            config,
            db,
            store,
            engine,
            classifier,
        })
    }

    fn ingestor(&self) -> Ingestor {
        let ingestor = Ingestor::new(
            Arc::new(ChannelRepository::new(Arc::clone(&self.db))),
            Arc::new(ChannelCache::from_config(&self.config.cache)),
            self.store.clone(),
        );
        match &self.classifier {
            Some(classifier) => ingestor.with_classifier(Arc::clone(classifier)),
            None => ingestor,
        }
    }

    fn aggregator(&self) -> DigestAggregator {
        DigestAggregator::new(self.store.clone(), self.config.digest.clone())
    }
}

/// Embedding provider: HTTP when an endpoint is configured, offline mock otherwise.
fn build_embedder(
    config: &PulseConfig,
) -> Result<Arc<dyn DynEmbeddingService>, Box<dyn std::error::Error>> {
    if config.embedding.endpoint.trim().is_empty() {
        tracing::warn!(
            dimensions = config.embedding.dimensions,
            "No embedding endpoint configured, using offline mock embeddings"
        );
        return Ok(Arc::new(MockEmbedding::with_dimensions(
            config.embedding.dimensions,
        )));
    }
    let service = HttpEmbeddingService::from_config(&config.embedding)?;
    tracing::info!(model = %config.embedding.model, "Embedding provider ready");
    Ok(Arc::new(service))
}

/// Metadata generator: HTTP when an endpoint is configured, placeholders otherwise.
fn build_metadata(
    config: &PulseConfig,
) -> Result<Arc<dyn MetadataGenerator>, Box<dyn std::error::Error>> {
    if config.metadata.endpoint.trim().is_empty() {
        tracing::warn!("No metadata endpoint configured, new stories get placeholder titles");
        return Ok(Arc::new(PlaceholderMetadata));
    }
    Ok(Arc::new(HttpMetadataGenerator::from_config(&config.metadata)?))
}

/// Channel classifier, only when a text-generation endpoint is configured.
fn build_classifier(
    config: &PulseConfig,
) -> Result<Option<Arc<dyn ChannelClassifier>>, Box<dyn std::error::Error>> {
    if config.metadata.endpoint.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(HttpChannelClassifier::from_config(&config.metadata)?)))
}

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if let Some(rest) = data_dir.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(data_dir)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the retention sweep on a fixed interval until shutdown.
async fn retention_loop(db: Arc<Database>, config: RetentionConfig, shutdown: Arc<Notify>) {
    let period = Duration::from_secs(config.sweep_interval_minutes.max(1) * 60);
    tracing::info!(
        interval_minutes = config.sweep_interval_minutes,
        max_age_hours = config.story_max_age_hours,
        "Retention loop started"
    );

    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.notified() => return,
        }

        let sweep_config = config.clone();
        match db.call(move |db| RetentionSweep::run(db, &sweep_config)).await {
            Ok(result) => tracing::debug!(?result, "Retention sweep finished"),
            Err(e) => tracing::warn!(error = %e, "Retention sweep failed"),
        }
    }
}

/// Background services until Ctrl-C.
async fn run(services: Services) -> Result<(), Box<dyn std::error::Error>> {
    let clustering = &services.config.clustering;
    let (queue, rx) = ClusterQueue::bounded(clustering.queue_capacity);

    let pool = Arc::new(ClusterWorkerPool::new(
        Arc::clone(&services.engine),
        clustering.workers,
    ));
    let pool_task = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run(rx).await })
    };

    let reconciler = Arc::new(Reconciler::new(services.store.clone(), queue, clustering));
    let reconcile_task = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.run().await })
    };

    let retention_shutdown = Arc::new(Notify::new());
    let retention_task = tokio::spawn(retention_loop(
        Arc::clone(&services.db),
        services.config.retention.clone(),
        Arc::clone(&retention_shutdown),
    ));

    tracing::info!("Pulse running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    reconciler.shutdown();
    retention_shutdown.notify_one();
    pool.shutdown();

    for (name, task) in [
        ("reconciler", reconcile_task),
        ("retention", retention_task),
        ("workers", pool_task),
    ] {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "Background task failed");
        }
    }

    let stats = pool.stats();
    tracing::info!(
        processed = stats.processed(),
        failed = stats.failed(),
        "Pulse stopped"
    );
    Ok(())
}

async fn ingest(services: &Services, args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let post = IncomingPost {
        channel: NewChannel {
            platform_id: args.channel,
            title: args.title,
            handle: args.handle,
            category: None,
        },
        message_id: args.message_id,
        text: args.text,
        views: args.views,
        published_at: args.published_at.unwrap_or_else(Utc::now),
    };

    let outcome = services.ingestor().ingest(post).await?;
    let clustered = match &outcome {
        IngestOutcome::Stored { publication_id, .. } => {
            Some(services.engine.cluster(*publication_id).await?)
        }
        _ => None,
    };

    print_json(&serde_json::json!({
        "ingest": outcome,
        "cluster": clustered,
    }))
}

fn subscription(
    services: &Services,
    args: SubscriptionArgs,
    subscribe: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let channel = ChannelRepository::new(Arc::clone(&services.db))
        .find_by_platform_id(args.channel)?
        .ok_or_else(|| InsightError::NotFound(format!("channel {}", args.channel)))?;

    let repo = SubscriptionRepository::new(Arc::clone(&services.db));
    let changed = if subscribe {
        repo.subscribe(args.user, channel.id)?
    } else {
        repo.unsubscribe(args.user, channel.id)?
    };

    print_json(&serde_json::json!({
        "user": args.user,
        "channel": channel.title,
        "subscribed": subscribe,
        "changed": changed,
        "subscriptions": repo.channel_ids(args.user)?.len(),
    }))
}

fn channels(services: &Services, active_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    let channels = ChannelRepository::new(Arc::clone(&services.db)).list(active_only)?;
    print_json(&channels)
}

async fn digest(services: &Services, args: DigestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let defaults = DigestRequest::from_config(&services.config.digest);
    let request = DigestRequest {
        lookback_hours: args.hours.unwrap_or(defaults.lookback_hours),
        group_by: args.group_by,
        pinned: args.pinned,
        limit: args.limit.unwrap_or(defaults.limit),
        offset: args.offset,
    };

    match services.aggregator().get_digest(args.user, &request).await {
        Ok(view) => print_json(&view),
        Err(e) if e.is_user_facing() => {
            println!("{}. Add a channel with `pulse subscribe`.", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn text_digest(services: &Services, user: i64) -> Result<(), Box<dyn std::error::Error>> {
    let generator = HttpNarrativeGenerator::from_config(&services.config.metadata)?;
    match services.aggregator().get_text_digest(user, &generator).await {
        Ok(text) => {
            println!("{}", text);
            Ok(())
        }
        Err(e) if e.is_user_facing() => {
            println!("{}. Add a channel with `pulse subscribe`.", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn reconcile(
    services: &Services,
    hours: Option<u32>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let hours = hours.unwrap_or(services.config.clustering.reconcile_window_hours);
    let limit = limit.unwrap_or(services.config.clustering.reconcile_batch_limit);
    let since = hours_before(Utc::now(), hours);
    let report = recluster_pending(&services.engine, services.store.as_ref(), since, limit).await?;
    print_json(&report)
}

async fn sweep(services: &Services) -> Result<(), Box<dyn std::error::Error>> {
    let config = services.config.retention.clone();
    let result = services
        .db
        .call(move |db| RetentionSweep::run(db, &config))
        .await?;
    print_json(&result)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; load errors are reported below.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(PulseConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => PulseConfig::default(),
    };

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Pulse v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
        None => tracing::info!(path = %config_file.display(), "No config file, using defaults"),
    }

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    config.general.data_dir = args.resolve_data_dir(&config.general.data_dir);
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let services = Services::open(config, data_dir)?;

    match args.command {
        Command::Run => run(services).await,
        Command::Ingest(ingest_args) => ingest(&services, ingest_args).await,
        Command::Subscribe(sub) => subscription(&services, sub, true),
        Command::Unsubscribe(sub) => subscription(&services, sub, false),
        Command::Channels { active_only } => channels(&services, active_only),
        Command::Digest(digest_args) => digest(&services, digest_args).await,
        Command::TextDigest { user } => text_digest(&services, user).await,
        Command::Reconcile { hours, limit } => reconcile(&services, hours, limit).await,
        Command::Sweep => sweep(&services).await,
    }
}
