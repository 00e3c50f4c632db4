use axum::{extract::State, Extension, Json};
use common::FolderNode;

use crate::state::{AppState, JsonResult, UserContext};
use crate::utils::run_blocking;

pub async fn list_folders(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> JsonResult<Vec<FolderNode>> {
    let folders = run_blocking(move || {
        let storage = state.user_storage(&ctx.user)?;
        state.library.find_all_folders(&storage, &state.nodes)
    })
    .await?;
    Ok(Json(folders))
}
