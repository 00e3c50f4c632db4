pub mod collection;
pub mod folders;
pub mod scan;
pub mod tracks;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use library::storage::is_valid_user_id;

use crate::state::{AppState, HealthResponse, UserContext};
use crate::utils::json_error_response;

pub fn api_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/collection/prepare", get(collection::prepare_collection))
        .route("/collection", get(collection::get_collection))
        .route("/folders", get(folders::list_folders))
        .route("/tracks/by-file/:file_id", get(tracks::track_by_file_id))
        .route("/tracks/:track_id/scrobble", post(tracks::scrobble))
        .route("/tracks/:track_id/playing", post(tracks::now_playing))
        .route("/files/:file_id/download", get(tracks::download_file))
        .route("/scan/state", get(scan::scan_state))
        .route("/scan", post(scan::scan))
        .route("/scan/reset", post(scan::reset_scanned))
        .layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn require_user(
    State(state): State<AppState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let user = match user_from_headers(req.headers(), &state.config.user_header) {
        Some(user) => user,
        None => return json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    };

    let home = state.storage_root.join(&user);
    let known = tokio::fs::metadata(&home)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !known {
        return json_error_response(StatusCode::UNAUTHORIZED, "unknown user");
    }

    req.extensions_mut().insert(UserContext { user });
    next.run(req).await
}

pub(crate) fn user_from_headers(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|user| is_valid_user_id(user))
        .map(str::to_string)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}
