use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use library::{CollectionCache, UserBlobCache};
use serde::Deserialize;

use crate::state::{AppState, CollectionHashResponse, JsonResult, UserContext};
use crate::utils::run_blocking;

#[derive(Debug, Deserialize)]
pub struct CollectionQuery {
    pub hash: Option<String>,
}

fn collection_cache<'a>(state: &'a AppState, blobs: &'a UserBlobCache) -> CollectionCache<'a> {
    CollectionCache::new(&state.library, &state.tokens, blobs).with_ttl(state.collection_ttl())
}

pub async fn prepare_collection(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> JsonResult<CollectionHashResponse> {
    let hash = run_blocking(move || {
        let blobs = state.blobs.for_user(&ctx.user)?;
        let cache = collection_cache(&state, &blobs);
        if let Some(hash) = cache.get_validity_hash(&ctx.user)? {
            return Ok(Some(hash));
        }
        cache.get_snapshot(&ctx.user)?;
        cache.get_validity_hash(&ctx.user)
    })
    .await?;
    Ok(Json(CollectionHashResponse { hash }))
}

pub async fn get_collection(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let cache_days = state.config.client_cache_days;
    let result = run_blocking(move || {
        let blobs = state.blobs.for_user(&ctx.user)?;
        let cache = collection_cache(&state, &blobs);
        let snapshot = cache.get_snapshot(&ctx.user)?;
        let actual = cache.get_validity_hash(&ctx.user)?;
        Ok((snapshot, actual))
    })
    .await;
    let (snapshot, actual) = match result {
        Ok(value) => value,
        Err(err) => return err.into_response(),
    };

    let mut response = Response::new(Body::from(snapshot));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    let cache_control = client_cache_control(query.hash.as_deref(), actual.as_deref(), cache_days);
    if let Some(value) = cache_control.and_then(|value| HeaderValue::from_str(&value).ok()) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

// Clients may keep the document only when they asked for the hash that is current now;
// the collection may have changed since they fetched the hash.
fn client_cache_control(requested: Option<&str>, actual: Option<&str>, days: u32) -> Option<String> {
    match (requested, actual) {
        (Some(requested), Some(actual)) if !actual.is_empty() && requested == actual && days > 0 => {
            Some(format!("private, max-age={}", u64::from(days) * 24 * 60 * 60))
        }
        _ => None,
    }
}
