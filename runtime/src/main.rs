use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docflow::{
    AppState,
    bus::InMemoryEventBus,
    config::AppConfig,
    pipeline::{
        Collaborators, KeywordClassifier, LogNotifier, Pipeline, PipelineConfig,
        PlainTextExtractor, SupportedTypes,
    },
    routes,
    storage::{FsObjectStore, JsonMetadataConfig, JsonMetadataStore, StorageManager},
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "Service crashed");
        for (depth, cause) in err.chain().skip(1).enumerate() {
            error!(cause_depth = depth + 1, cause = %cause, "caused by");
        }
        eprintln!("Service crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        // .env is optional
        info!(reason = %err, "No .env file loaded");
    }

    let config = AppConfig::load()
        .await
        .context("Failed to load application configuration")?;
    info!(
        table = %config.metadata_table,
        processed_bucket = %config.processed_bucket,
        internal_topic = %config.topics.internal,
        "Loaded configuration"
    );

    let metadata = Arc::new(JsonMetadataStore::new(JsonMetadataConfig {
        working_dir: config.working_dir.join("metadata"),
        table_name: config.metadata_table.clone(),
        workspace: config.workspace.clone(),
        feed: config.bus,
    }));
    let objects = Arc::new(FsObjectStore::new(config.working_dir.join("objects")));

    let mut storage_manager = StorageManager::new();
    storage_manager.register_metadata("metadata", metadata.clone());
    storage_manager.register_objects("objects", objects.clone());
    storage_manager.initialize_all().await?;

    let bus = Arc::new(InMemoryEventBus::new(config.bus));
    let pipeline = Arc::new(Pipeline::new(
        Collaborators {
            store: metadata.clone(),
            objects: objects.clone(),
            bus,
            extractor: Arc::new(PlainTextExtractor::new(objects.clone())),
            classifier: Arc::new(KeywordClassifier::default()),
            notifier: Arc::new(LogNotifier),
        },
        PipelineConfig {
            processed_bucket: config.processed_bucket.clone(),
            topics: config.topics.clone(),
            retry: config.retry.clone(),
            batch: config.batch.clone(),
            supported: SupportedTypes::default(),
        },
    ));

    let cancel = CancellationToken::new();
    let stages = pipeline.spawn(cancel.clone());

    let resumed = pipeline.resume_received().await?;
    if !resumed.is_empty() {
        info!(
            processed = resumed.processed(),
            failed = resumed.failed(),
            "Resumed received documents"
        );
    }

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        pipeline,
        objects,
        storages_status: storage_manager.status(),
    });

    let addr_string = format!("{}:{}", config.server.host, config.server.port);
    let addr = addr_string
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid server address: {addr_string}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;
    info!(%addr, "Server listening");

    let server_result = axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    for stage in stages {
        if let Err(err) = stage.await {
            warn!(error = %err, "Stage task ended abnormally");
        }
    }

    if let Err(err) = storage_manager.finalize_all().await {
        warn!(error = %err, "Failed to finalize storages");
    }

    server_result.context("Server encountered a fatal error")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    info!("Received SIGTERM");
                }
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}
