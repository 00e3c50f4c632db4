use std::env;
use std::sync::Arc;

use cumulus_server::config::{config_path_from_env, load_config, resolve_path};
use library::{invalidate_collection, DbCache, Library, NodeStore, UserStorage};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let user = env::args()
        .nth(1)
        .or_else(|| env::var("SCAN_USER").ok())
        .ok_or("SCAN_USER not set and no user argument")?;

    // Same config as the server, so mount-sourced tracks survive the rewrite.
    let config_path = config_path_from_env();
    let config = load_config(&config_path)
        .map_err(|err| format!("cannot read config {}: {}", config_path.display(), err))?;
    let storage_root = resolve_path(&config_path, &config.storage_root);
    let index_path = resolve_path(&config_path, &config.index_path);
    let mounts = config.resolved_mounts(&config_path);

    let storage = UserStorage::new(&storage_root, &user, &config.music_folder, &mounts)?;
    if !storage.exists() {
        return Err(format!("no home directory at {}", storage.home_dir().display()).into());
    }
    info!(
        "Scanning {} with {} visible mounts into {}",
        user,
        storage.mounts().len(),
        index_path.display()
    );

    let db = Library::open_db(&index_path)?;
    let library = Library::new(Arc::clone(&db));
    library.init_tables()?;
    let nodes = NodeStore::new(Arc::clone(&db));
    nodes.init_tables()?;
    let tokens = DbCache::new(db);
    tokens.init_tables()?;

    let stats = library.scan_user(&storage, &nodes)?;
    invalidate_collection(&tokens, &user)?;

    info!(
        "Indexed {}: {} artists, {} albums, {} tracks",
        user, stats.artists, stats.albums, stats.tracks
    );

    Ok(())
}
