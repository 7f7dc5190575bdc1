use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coffer_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("`since` is required")]
    SinceRequired,

    #[error("`fileId` is required")]
    FileIdRequired,

    #[error("File not found")]
    FileNotFound,

    #[error("File was written with an old sync format")]
    FileOldVersion,

    #[error("File has no sync group and must be uploaded")]
    FileNeedsUpload,

    #[error("Registered key does not match the file's encryption metadata")]
    FileKeyMismatch,

    #[error("File has been reset")]
    FileHasReset,

    #[error("File is encrypted with a newer key")]
    FileHasNewKey,

    #[error("Malformed sync request: {0}")]
    MalformedRequest(String),

    #[error("Malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("Batch too large: {0}")]
    BatchTooLarge(String),

    #[error("Snapshot too large: {size} bytes (max {max})")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("Snapshot storage error: {0}")]
    SnapshotStorage(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::SinceRequired => "since-required",
            ServerError::FileIdRequired => "fileId-required",
            ServerError::FileNotFound => "file-not-found",
            ServerError::FileOldVersion => "file-old-version",
            ServerError::FileNeedsUpload => "file-needs-upload",
            ServerError::FileKeyMismatch => "file-key-mismatch",
            ServerError::FileHasReset => "file-has-reset",
            ServerError::FileHasNewKey => "file-has-new-key",
            ServerError::MalformedTimestamp(_) => "malformed-timestamp",
            ServerError::BatchTooLarge(_) | ServerError::SnapshotTooLarge { .. } => {
                "payload-too-large"
            }
            ServerError::Unauthorized => "unauthorized",
            ServerError::BadRequest(_) => "bad-request",
            ServerError::MalformedRequest(_)
            | ServerError::SnapshotStorage(_)
            | ServerError::Store(_)
            | ServerError::Internal(_) => "internal-error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let json = |status: StatusCode, reason: &str, details: Option<&str>| {
            let mut body = serde_json::json!({ "status": "error", "reason": reason });
            if let Some(details) = details {
                body["details"] = details.into();
            }
            (status, axum::Json(body)).into_response()
        };

        match &self {
            ServerError::SinceRequired
            | ServerError::FileIdRequired
            | ServerError::MalformedTimestamp(_) => json(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable-entity",
                Some(self.code()),
            ),
            ServerError::FileNotFound
            | ServerError::FileOldVersion
            | ServerError::FileNeedsUpload
            | ServerError::FileKeyMismatch
            | ServerError::FileHasReset
            | ServerError::FileHasNewKey => {
                (StatusCode::BAD_REQUEST, self.code()).into_response()
            }
            ServerError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, message.clone()).into_response()
            }
            ServerError::BatchTooLarge(_) | ServerError::SnapshotTooLarge { .. } => {
                let details = self.to_string();
                json(StatusCode::PAYLOAD_TOO_LARGE, self.code(), Some(&details))
            }
            ServerError::Unauthorized => {
                json(StatusCode::UNAUTHORIZED, "unauthorized", Some("token-not-found"))
            }
            ServerError::MalformedRequest(_)
            | ServerError::SnapshotStorage(_)
            | ServerError::Store(_)
            | ServerError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                json(StatusCode::INTERNAL_SERVER_ERROR, "internal-error", None)
            }
        }
    }
}
