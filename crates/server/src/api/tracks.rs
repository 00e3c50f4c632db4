use std::io::SeekFrom;
use std::path::Path as FsPath;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use common::{CollectionTrack, NodeId};
use library::{collection_track, Scrobbler};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::range::{parse_range_header, RangeError};
use crate::state::{AppState, JsonResult, SuccessResponse, UserContext};
use crate::utils::{json_error, json_error_response, run_blocking};

pub async fn track_by_file_id(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(file_id): Path<NodeId>,
) -> JsonResult<CollectionTrack> {
    let track = run_blocking(move || state.library.find_by_file_id(&ctx.user, file_id)).await?;
    match track {
        Some(track) => Ok(Json(collection_track(track))),
        None => Err(json_error(StatusCode::NOT_FOUND, "track not found")),
    }
}

pub async fn scrobble(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(track_id): Path<String>,
) -> JsonResult<SuccessResponse> {
    let found = run_blocking(move || {
        let Some(track) = state.library.get_track(&ctx.user, &track_id)? else {
            return Ok(false);
        };
        state.scrobbler.record_track_played(&track, unix_now())?;
        Ok(true)
    })
    .await?;
    if found {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(json_error(StatusCode::NOT_FOUND, "track not found"))
    }
}

pub async fn now_playing(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(track_id): Path<String>,
) -> JsonResult<SuccessResponse> {
    let found = run_blocking(move || {
        let Some(track) = state.library.get_track(&ctx.user, &track_id)? else {
            return Ok(false);
        };
        state.scrobbler.set_now_playing(&track, unix_now())?;
        Ok(true)
    })
    .await?;
    if found {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(json_error(StatusCode::NOT_FOUND, "track not found"))
    }
}

pub async fn download_file(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(file_id): Path<NodeId>,
    headers: HeaderMap,
) -> Response {
    let lookup = run_blocking(move || {
        let storage = state.user_storage(&ctx.user)?;
        storage.file_path(&state.nodes, file_id)
    })
    .await;
    let path = match lookup {
        Ok(Some(path)) => path,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "file not found"),
        Err(err) => return err.into_response(),
    };

    match serve_file(&path, headers.get(header::RANGE)).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Download of {} failed: {}", path.display(), err);
            json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
        }
    }
}

async fn serve_file(path: &FsPath, range: Option<&HeaderValue>) -> std::io::Result<Response> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();

    let requested = range
        .and_then(|value| value.to_str().ok())
        .map(|value| parse_range_header(value, size));

    let mut response = match requested {
        Some(Ok(range)) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            let body = Body::from_stream(ReaderStream::new(file.take(range.len())));
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            insert_header(&mut response, header::CONTENT_LENGTH, range.len().to_string());
            insert_header(&mut response, header::CONTENT_RANGE, range.content_range(size));
            response
        }
        Some(Err(RangeError::Unsatisfiable)) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert_header(&mut response, header::CONTENT_RANGE, format!("bytes */{}", size));
            return Ok(response);
        }
        Some(Err(RangeError::Invalid)) | None => {
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            insert_header(&mut response, header::CONTENT_LENGTH, size.to_string());
            response
        }
    };

    insert_header(&mut response, header::CONTENT_TYPE, mime);
    insert_header(&mut response, header::ACCEPT_RANGES, "bytes".to_string());
    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
        insert_header(&mut response, header::CONTENT_DISPOSITION, attachment(name));
    }
    Ok(response)
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(name, value);
    }
}

fn attachment(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|ch| if ch == '"' || ch == '\\' || ch.is_control() { '_' } else { ch })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use axum::http::{header, HeaderValue, StatusCode};

    use super::{attachment, serve_file};

    #[test]
    fn attachment_names_are_quoted_safely() {
        assert_eq!(attachment("a \"b\".mp3"), "attachment; filename=\"a _b_.mp3\"");
    }

    #[tokio::test]
    async fn serves_ranges_and_rejects_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"0123456789").unwrap();

        let partial = serve_file(&path, Some(&HeaderValue::from_static("bytes=2-5")))
            .await
            .unwrap();
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(partial.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(partial.headers()[header::CONTENT_LENGTH], "4");
        assert_eq!(partial.headers()[header::CONTENT_TYPE], "audio/mpeg");

        let outside = serve_file(&path, Some(&HeaderValue::from_static("bytes=10-")))
            .await
            .unwrap();
        assert_eq!(outside.status(), StatusCode::RANGE_NOT_SATISFIABLE);

        let whole = serve_file(&path, None).await.unwrap();
        assert_eq!(whole.status(), StatusCode::OK);
        assert_eq!(whole.headers()[header::CONTENT_LENGTH], "10");
    }
}
