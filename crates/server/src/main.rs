mod api;
mod range;
mod scan;
mod state;
mod utils;
mod watch;

use std::sync::Arc;

use axum::Router;
use api::api_router;
use cumulus_server::config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{
    AggregateScrobbler, Concurrency, DbCache, FileBlobCache, Library, NodeStore,
    PlayLogScrobbler, Scrobbler,
};
use parking_lot::RwLock;
use scan::start_initial_scan;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let storage_root = resolve_path(&config_path, &config.storage_root);
    std::fs::create_dir_all(&storage_root)?;
    let index_path = resolve_path(&config_path, &config.index_path);
    let blob_root = resolve_path(&config_path, &config.blob_cache_path);

    let db = Library::open_db(&index_path)?;
    let library = Library::new(Arc::clone(&db));
    library.init_tables()?;
    let nodes = NodeStore::new(Arc::clone(&db));
    nodes.init_tables()?;
    let tokens = DbCache::new(Arc::clone(&db));
    tokens.init_tables()?;
    let play_log = PlayLogScrobbler::new(Arc::clone(&db));
    play_log.init_tables()?;

    if !config.mutex_enabled {
        warn!("Per-user mutexes are disabled; concurrent rescans are not serialized");
    }
    let concurrency = Arc::new(Concurrency::new(tokens.clone(), config.mutex_enabled));
    let scrobblers: Vec<Arc<dyn Scrobbler>> = vec![Arc::new(play_log)];
    let scrobbler: Arc<dyn Scrobbler> = Arc::new(AggregateScrobbler::new(scrobblers));
    let mounts = config.resolved_mounts(&config_path);
    for mount in &mounts {
        info!(
            "Mount {} at {} shown as {} to {} users",
            mount.name,
            mount.path.display(),
            mount.mount_point,
            mount.users.len()
        );
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        config: Arc::new(config),
        storage_root,
        mounts: Arc::new(mounts),
        library,
        nodes,
        tokens,
        blobs: FileBlobCache::new(blob_root),
        concurrency,
        scrobbler,
        watcher: Arc::new(RwLock::new(None)),
    };
    start_initial_scan(state.clone());

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
