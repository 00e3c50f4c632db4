use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::time::Duration;

use library::storage::is_valid_user_id;
use library::Mount;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::scan::rescan_user;
use crate::state::AppState;

pub fn configure_watcher(state: &AppState) {
    if !state.config.watch_storage {
        info!("Watcher disabled (watch_storage=false)");
        *state.watcher.write() = None;
        return;
    }

    let debounce = Duration::from_secs(state.config.watch_debounce_secs.max(1));
    match setup_watcher(state.clone(), debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} and {} mounts for changes (debounce {}s)",
                state.storage_root.display(),
                state.mounts.len(),
                debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    state: AppState,
    debounce: Duration,
) -> Result<RecommendedWatcher, Box<dyn std::error::Error>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(&state.storage_root, RecursiveMode::Recursive)?;
    for mount in state.mounts.iter() {
        if let Err(err) = watcher.watch(&mount.path, RecursiveMode::Recursive) {
            warn!("Cannot watch mount {} at {}: {}", mount.name, mount.path.display(), err);
        }
    }

    tokio::spawn(async move {
        watch_loop(state, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(state: AppState, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let mut pending: BTreeSet<String> = BTreeSet::new();
        match rx.recv().await {
            Some(event) => collect_users(&state, &event, &mut pending),
            None => break,
        }
        if pending.is_empty() {
            continue;
        }

        // Wait until the storage has been quiet for one debounce period.
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => collect_users(&state, &event, &mut pending),
                    None => return,
                },
            }
        }

        for user in pending {
            let scan_state = state.clone();
            let scan_user = user.clone();
            match tokio::task::spawn_blocking(move || rescan_user(&scan_state, &scan_user)).await {
                Ok(Ok(stats)) => info!(
                    "Auto-scan of {} complete: {} artists, {} albums, {} tracks",
                    user, stats.artists, stats.albums, stats.tracks
                ),
                Ok(Err(err)) => warn!("Auto-scan of {} failed: {}", user, err),
                Err(err) => warn!("Auto-scan of {} join error: {}", user, err),
            }
        }
    }
}

fn collect_users(state: &AppState, event: &Event, out: &mut BTreeSet<String>) {
    if !is_relevant_event(event) {
        return;
    }
    for path in &event.paths {
        out.extend(affected_users(&state.storage_root, &state.mounts, path));
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

// Users whose library may include `path`: the owner of the home it lies in,
// or every user a containing mount is shared with.
fn affected_users(storage_root: &Path, mounts: &[Mount], path: &Path) -> Vec<String> {
    let mut users = Vec::new();
    if let Ok(rest) = path.strip_prefix(storage_root) {
        if let Some(Component::Normal(name)) = rest.components().next() {
            if let Some(name) = name.to_str().filter(|name| is_valid_user_id(name)) {
                users.push(name.to_string());
            }
        }
    }
    for mount in mounts {
        if path.starts_with(&mount.path) {
            users.extend(mount.users.iter().cloned());
        }
    }
    users
}
