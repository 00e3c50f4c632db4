use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Json;
use library::{
    Concurrency, DbCache, FileBlobCache, Library, LibraryError, Mount, NodeStore, Scrobbler,
    UserStorage,
};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::Serialize;

use cumulus_server::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub storage_root: PathBuf,
    pub mounts: Arc<Vec<Mount>>,
    pub library: Library,
    pub nodes: NodeStore,
    pub tokens: DbCache,
    pub blobs: FileBlobCache,
    pub concurrency: Arc<Concurrency>,
    pub scrobbler: Arc<dyn Scrobbler>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl AppState {
    pub fn user_storage(&self, user: &str) -> Result<UserStorage, LibraryError> {
        UserStorage::new(
            &self.storage_root,
            user,
            &self.config.music_folder,
            &self.mounts,
        )
    }

    pub fn collection_ttl(&self) -> Duration {
        Duration::from_secs(self.config.collection_ttl_secs)
    }
}

#[derive(Clone, Debug)]
pub struct UserContext {
    pub user: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct CollectionHashResponse {
    pub hash: Option<String>,
}

#[derive(Serialize)]
pub struct ScanStateResponse {
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
