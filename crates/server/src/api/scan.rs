use axum::{extract::State, Extension, Json};
use library::LibraryStats;
use tracing::info;

use crate::scan::{reset_user, rescan_user};
use crate::state::{AppState, JsonResult, ScanStateResponse, SuccessResponse, UserContext};
use crate::utils::run_blocking;

fn scan_state_response(stats: LibraryStats) -> ScanStateResponse {
    ScanStateResponse {
        tracks: stats.tracks,
        artists: stats.artists,
        albums: stats.albums,
    }
}

pub async fn scan_state(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> JsonResult<ScanStateResponse> {
    let stats = run_blocking(move || state.library.stats(&ctx.user)).await?;
    Ok(Json(scan_state_response(stats)))
}

pub async fn scan(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> JsonResult<ScanStateResponse> {
    info!("Rescan requested by {}", ctx.user);
    let stats = run_blocking(move || rescan_user(&state, &ctx.user)).await?;
    Ok(Json(scan_state_response(stats)))
}

pub async fn reset_scanned(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> JsonResult<SuccessResponse> {
    info!("Index reset requested by {}", ctx.user);
    run_blocking(move || reset_user(&state, &ctx.user)).await?;
    Ok(Json(SuccessResponse { success: true }))
}
