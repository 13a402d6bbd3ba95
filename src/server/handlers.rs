use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};
use std::path::Path as FsPath;
use std::sync::Arc;

use super::errors::{AppError, AppResult};
use super::AppState;
use crate::access::Caller;
use crate::archive::{format_date, parse_date, SiteId};
use crate::pipeline::{thumbnail_path, thumbnail_sites, SiteSnapshot, Snapshot};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";
const ARCHIVED: &str = "private, max-age=86400";

/// Run filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// A site the caller may see. Invisible and nonexistent sites both 404.
fn visible_site(caller: &Caller, site: &str) -> AppResult<SiteId> {
    if !caller.grant.permits(site) {
        return Err(AppError::not_found("not found"));
    }
    Ok(SiteId::new(site)?)
}

/// Like [`visible_site`], but `None` when the caller may not see the site,
/// so image reads can answer with the placeholder.
fn image_site(caller: &Caller, site: &str) -> AppResult<Option<SiteId>> {
    if !caller.grant.permits(site) {
        return Ok(None);
    }
    Ok(Some(SiteId::new(site)?))
}

fn placeholder_response(state: &AppState) -> Response {
    (
        [(header::CONTENT_TYPE, "image/jpeg"), (header::CACHE_CONTROL, NO_CACHE)],
        state.placeholder.bytes().to_vec(),
    )
        .into_response()
}

fn content_type_for(name: &str) -> &'static str {
    let ext = FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

async fn read_file(path: &FsPath) -> AppResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found("not found")),
        Err(e) => Err(AppError::internal(format!("reading {}: {}", path.display(), e))),
    }
}

async fn file_response(path: &FsPath, cache_control: &'static str) -> AppResult<Response> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    let bytes = read_file(path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&name)),
            (header::CACHE_CONTROL, cache_control),
        ],
        [(header::CONTENT_DISPOSITION, format!("inline; filename=\"{}\"", name))],
        bytes,
    )
        .into_response())
}

async fn load_snapshot(state: &AppState) -> AppResult<Snapshot> {
    let store = state.snapshots.clone();
    blocking(move || Ok(store.load()?)).await
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_sites(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<SiteId>>> {
    let index = Arc::clone(&state.index);
    let sites = blocking(move || Ok(index.list_sites()?)).await?;
    Ok(Json(caller.grant.filter_sites(sites)))
}

pub async fn snapshot(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Snapshot>> {
    let snapshot = load_snapshot(&state).await?;
    Ok(Json(caller.grant.filter_snapshot(snapshot)))
}

pub async fn site_snapshot(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site): Path<String>,
) -> AppResult<Json<SiteSnapshot>> {
    let site = visible_site(&caller, &site)?;
    let snapshot = load_snapshot(&state).await?;
    snapshot
        .get(site.as_str())
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found("not found"))
}

pub async fn list_dates(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site): Path<String>,
) -> AppResult<Json<Vec<String>>> {
    let site = visible_site(&caller, &site)?;
    let index = Arc::clone(&state.index);
    let dates = blocking(move || Ok(index.list_dates(&site)?)).await?;
    Ok(Json(dates.into_iter().map(format_date).collect()))
}

pub async fn list_photos(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((site, date)): Path<(String, String)>,
) -> AppResult<Json<Vec<String>>> {
    let site = visible_site(&caller, &site)?;
    let date = parse_date(&date).ok_or_else(|| AppError::not_found("not found"))?;
    let index = Arc::clone(&state.index);
    let photos = blocking(move || Ok(index.list_photos(&site, date)?)).await?;
    Ok(Json(photos))
}

pub async fn photo(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((site, date, name)): Path<(String, String, String)>,
) -> AppResult<Response> {
    let Some(site) = image_site(&caller, &site)? else {
        return Ok(placeholder_response(&state));
    };
    let date = parse_date(&date).ok_or_else(|| AppError::not_found("not found"))?;
    let index = Arc::clone(&state.index);
    let path = blocking(move || Ok(index.photo_path(&site, date, &name)?)).await?;
    file_response(&path, ARCHIVED).await
}

/// Most recent photo of the site's latest date folder.
pub async fn latest_photo(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site): Path<String>,
) -> AppResult<Response> {
    let Some(site) = image_site(&caller, &site)? else {
        return Ok(placeholder_response(&state));
    };
    let index = Arc::clone(&state.index);
    let path = blocking(move || {
        let date = index.latest_date(&site)?;
        let name = index.latest_photo(&site, date)?;
        Ok(index.photo_path(&site, date, &name)?)
    })
    .await?;
    // The latest photo changes through the day.
    file_response(&path, NO_CACHE).await
}

pub async fn list_videos(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site): Path<String>,
) -> AppResult<Json<Vec<String>>> {
    let site = visible_site(&caller, &site)?;
    let index = Arc::clone(&state.index);
    let videos = blocking(move || Ok(index.list_videos(&site)?)).await?;
    Ok(Json(videos))
}

pub async fn video(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((site, name)): Path<(String, String)>,
) -> AppResult<Response> {
    let Some(site) = image_site(&caller, &site)? else {
        return Ok(placeholder_response(&state));
    };
    let index = Arc::clone(&state.index);
    let path = blocking(move || Ok(index.video_path(&site, &name)?)).await?;
    file_response(&path, ARCHIVED).await
}

pub async fn list_thumbnails(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> AppResult<Json<Vec<SiteId>>> {
    let dir = state.thumbnail_dir.clone();
    let sites = blocking(move || {
        thumbnail_sites(&dir).map_err(|e| AppError::internal(format!("listing thumbnails: {}", e)))
    })
    .await?;
    Ok(Json(caller.grant.filter_sites(sites)))
}

pub async fn thumbnail(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(site): Path<String>,
) -> AppResult<Response> {
    let Some(site) = image_site(&caller, &site)? else {
        return Ok(placeholder_response(&state));
    };
    let bytes = read_file(&thumbnail_path(&state.thumbnail_dir, &site)).await?;
    let headers = [(header::CONTENT_TYPE, "image/jpeg"), (header::CACHE_CONTROL, NO_CACHE)];
    Ok((headers, bytes).into_response())
}
