//! # coffer-server
//!
//! Sync relay for multi-device budget files.
//!
//! This binary provides:
//! - **Message relay**: clients push timestamped, usually encrypted, change
//!   messages and pull everything they have not seen, per sync group
//! - **Reconciliation trie** returned with every sync so clients can find
//!   where they diverge
//! - **File registry** tracking each budget's group, key and format version
//! - **Snapshot storage** for full-file uploads and downloads
//! - **REST API** (axum) behind a session-token gate

mod api;
mod blob_store;
mod config;
mod error;
mod lifecycle;
mod registry;
mod session;
mod sync;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::session::StaticTokens;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,coffer_server=debug,coffer_store=debug")
            }),
        )
        .init();

    info!("Starting coffer sync relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        server_files = %config.server_files.display(),
        user_files = %config.user_files.display(),
        sessions = config.session_tokens.len(),
        "Loaded configuration"
    );
    if config.session_tokens.is_empty() {
        tracing::warn!("SESSION_TOKENS is empty, every /sync request will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize storage
    // -----------------------------------------------------------------------

    // Account database: migrate once at startup.
    let server_files = config.server_files.clone();
    tokio::task::spawn_blocking(move || coffer_store::Database::open_in(&server_files))
        .await??;

    let blob_store =
        Arc::new(BlobStore::new(config.user_files.clone(), config.upload_limit).await?);

    let app_state = AppState {
        blob_store,
        sessions: Arc::new(StaticTokens::new(config.session_tokens.clone())),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
