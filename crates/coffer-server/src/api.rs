use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderName, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use coffer_shared::constants::{ENCRYPTED_FILE_CONTENT_TYPE, SYNC_CONTENT_TYPE, SYNC_METHOD};
use coffer_shared::FileId;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::lifecycle::{self, blocking, KeyRegistration, UploadRequest};
use crate::session::{require_session, SessionValidator};
use crate::sync::{self, SyncLimits};

const SYNC_METHOD_HEADER: HeaderName = HeaderName::from_static("x-actual-sync-method");

#[derive(Clone)]
pub struct AppState {
    pub blob_store: Arc<BlobStore>,
    pub sessions: Arc<dyn SessionValidator>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let sync_routes = Router::new()
        .route(
            "/sync",
            post(sync_messages).layer(DefaultBodyLimit::max(state.config.sync_body_limit)),
        )
        .route("/user-create-key", post(user_create_key))
        .route("/user-get-key", post(user_get_key))
        .route(
            "/upload-user-file",
            post(upload_user_file).layer(DefaultBodyLimit::max(state.config.upload_limit)),
        )
        .route("/download-user-file", get(download_user_file))
        .route("/reset-user-file", post(reset_user_file))
        .route("/update-user-filename", post(update_user_filename))
        .route("/delete-user-file", post(delete_user_file))
        .route("/list-user-files", get(list_user_files))
        .route("/get-user-file-info", get(get_user_file_info))
        .route_layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/sync", sync_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn ok() -> Json<OkResponse<()>> {
    Json(OkResponse {
        status: "ok",
        data: None,
    })
}

fn ok_with<T: Serialize>(data: T) -> Json<OkResponse<T>> {
    Json(OkResponse {
        status: "ok",
        data: Some(data),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    status: &'static str,
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileRequest {
    file_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    file_id: Option<String>,
    key_id: Option<String>,
    key_salt: Option<String>,
    test_content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest {
    file_id: Option<String>,
    name: Option<String>,
}

/// A missing id cannot name a registered file.
fn file_id_or_not_found(id: Option<String>) -> Result<FileId, ServerError> {
    match id {
        Some(id) if !id.is_empty() => Ok(FileId(id)),
        _ => Err(ServerError::FileNotFound),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn sync_messages(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let server_files = state.config.server_files.clone();
    let limits = SyncLimits::from(state.config.as_ref());

    let response = blocking(move || sync::handle_sync(&server_files, limits, &body)).await?;

    Ok((
        [
            (header::CONTENT_TYPE, SYNC_CONTENT_TYPE),
            (SYNC_METHOD_HEADER, SYNC_METHOD),
        ],
        response.to_bytes(),
    )
        .into_response())
}

async fn user_create_key(
    State(state): State<AppState>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let registration = KeyRegistration {
        file_id: file_id_or_not_found(req.file_id)?,
        key_id: req
            .key_id
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServerError::BadRequest("keyId is required".into()))?,
        salt: req.key_salt,
        test: req.test_content,
    };
    let server_files = state.config.server_files.clone();
    blocking(move || lifecycle::register_key(&server_files, &registration)).await?;
    Ok(ok())
}

async fn user_get_key(
    State(state): State<AppState>,
    Json(req): Json<FileRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let file_id = file_id_or_not_found(req.file_id)?;
    let server_files = state.config.server_files.clone();
    let key = blocking(move || lifecycle::get_key(&server_files, &file_id)).await?;
    Ok(ok_with(key))
}

async fn upload_user_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ServerError> {
    let name = header_str(&headers, "x-actual-name")
        .ok_or_else(|| ServerError::BadRequest("single x-actual-name is required".into()))?;
    let name = percent_decode_str(name)
        .decode_utf8()
        .map_err(|_| ServerError::BadRequest("x-actual-name is not valid UTF-8".into()))?
        .into_owned();

    let file_id = header_str(&headers, "x-actual-file-id")
        .map(FileId::from)
        .ok_or_else(|| ServerError::BadRequest("fileId is required".into()))?;

    let encrypt_meta = header_str(&headers, "x-actual-encrypt-meta").map(str::to_string);
    if let Some(meta) = &encrypt_meta {
        serde_json::from_str::<serde_json::Value>(meta)
            .map_err(|_| ServerError::BadRequest("x-actual-encrypt-meta is not JSON".into()))?;
    }

    let sync_version = header_str(&headers, "x-actual-format")
        .map(|v| v.parse::<i64>())
        .transpose()
        .map_err(|_| ServerError::BadRequest("x-actual-format must be a number".into()))?;

    let request = UploadRequest {
        file_id,
        name,
        group_id: header_str(&headers, "x-actual-group-id").map(str::to_string),
        encrypt_meta,
        sync_version,
    };

    let group_id = lifecycle::upload_file(
        state.config.server_files.clone(),
        &state.blob_store,
        request,
        body,
    )
    .await?;

    Ok(Json(UploadResponse {
        status: "ok",
        group_id: group_id.to_string(),
    }))
}

async fn download_user_file(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let file_id = header_str(&headers, "x-actual-file-id")
        .map(FileId::from)
        .ok_or_else(|| ServerError::BadRequest("Single file ID is required".into()))?;

    let data =
        lifecycle::download_file(state.config.server_files.clone(), &state.blob_store, file_id.clone())
            .await?;

    Ok((
        [
            (header::CONTENT_TYPE, ENCRYPTED_FILE_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment;filename={file_id}"),
            ),
        ],
        data,
    )
        .into_response())
}

async fn reset_user_file(
    State(state): State<AppState>,
    Json(req): Json<FileRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let file_id = file_id_or_not_found(req.file_id)?;
    let server_files = state.config.server_files.clone();
    blocking(move || lifecycle::reset_file(&server_files, &file_id)).await?;
    Ok(ok())
}

async fn update_user_filename(
    State(state): State<AppState>,
    Json(req): Json<RenameRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let file_id = file_id_or_not_found(req.file_id)?;
    let name = req
        .name
        .ok_or_else(|| ServerError::BadRequest("name is required".into()))?;
    let server_files = state.config.server_files.clone();
    blocking(move || lifecycle::rename_file(&server_files, &file_id, &name)).await?;
    Ok(ok())
}

async fn delete_user_file(
    State(state): State<AppState>,
    Json(req): Json<FileRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let file_id = match req.file_id {
        Some(id) if !id.is_empty() => FileId(id),
        _ => return Err(ServerError::FileIdRequired),
    };
    let server_files = state.config.server_files.clone();
    blocking(move || lifecycle::delete_file(&server_files, &file_id)).await?;
    Ok(ok())
}

async fn list_user_files(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let server_files = state.config.server_files.clone();
    let files = blocking(move || lifecycle::list_files(&server_files)).await?;
    Ok(ok_with(files))
}

async fn get_user_file_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    let file_id = file_id_or_not_found(header_str(&headers, "x-actual-file-id").map(str::to_string))?;
    let server_files = state.config.server_files.clone();
    let info = blocking(move || lifecycle::file_info(&server_files, &file_id)).await?;
    Ok(ok_with(info))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
