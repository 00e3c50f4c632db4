use std::fs;
use std::path::Path;

use library::storage::is_valid_user_id;
use library::{invalidate_collection, LibraryError, LibraryStats};
use tracing::{info, warn};

use crate::state::AppState;
use crate::watch::configure_watcher;

pub const SCAN_MUTEX_KEY: &str = "scan";

pub fn rescan_user(state: &AppState, user: &str) -> Result<LibraryStats, LibraryError> {
    let storage = state.user_storage(user)?;
    let _guard = state.concurrency.mutex_reserve(user, SCAN_MUTEX_KEY);
    let stats = state.library.scan_user(&storage, &state.nodes)?;
    invalidate_collection(&state.tokens, user)?;
    Ok(stats)
}

pub fn reset_user(state: &AppState, user: &str) -> Result<(), LibraryError> {
    let _guard = state.concurrency.mutex_reserve(user, SCAN_MUTEX_KEY);
    state.library.reset_user(user)?;
    invalidate_collection(&state.tokens, user)?;
    Ok(())
}

pub fn home_users(storage_root: &Path) -> Vec<String> {
    let entries = match fs::read_dir(storage_root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Cannot list storage root {}: {}", storage_root.display(), err);
            return Vec::new();
        }
    };
    let mut users: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str().map(|name| name.to_string()))
        .filter(|name| is_valid_user_id(name))
        .collect();
    users.sort();
    users
}

pub fn start_initial_scan(state: AppState) {
    tokio::spawn(async move {
        let users = home_users(&state.storage_root);
        info!("Initial scan of {} users", users.len());
        for user in users {
            let scan_state = state.clone();
            let scan_user = user.clone();
            let result =
                tokio::task::spawn_blocking(move || rescan_user(&scan_state, &scan_user)).await;
            match result {
                Ok(Ok(stats)) => info!(
                    "Library of {} ready: {} artists, {} albums, {} tracks",
                    user, stats.artists, stats.albums, stats.tracks
                ),
                Ok(Err(err)) => warn!("Scan of {} failed: {}", user, err),
                Err(err) => warn!("Scan of {} join error: {}", user, err),
            }
        }
        configure_watcher(&state);
    });
}
