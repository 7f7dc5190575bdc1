//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

const MIB: usize = 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5006`
    pub http_addr: SocketAddr,

    /// Directory holding `account.sqlite` and the `group-*.sqlite` logs.
    /// Env: `SERVER_FILES`
    /// Default: `./server-files`
    pub server_files: PathBuf,

    /// Directory holding uploaded file snapshots.
    /// Env: `USER_FILES`
    /// Default: `./user-files`
    pub user_files: PathBuf,

    /// Accepted session tokens.
    /// Env: `SESSION_TOKENS` (comma-separated)
    /// Default: empty, every gated request is rejected.
    pub session_tokens: Vec<String>,

    /// Maximum body size of a sync request in bytes.
    /// Env: `SYNC_BODY_LIMIT_MB`
    /// Default: 20 MiB
    pub sync_body_limit: usize,

    /// Maximum snapshot upload size in bytes.
    /// Env: `UPLOAD_LIMIT_MB`
    /// Default: 50 MiB
    pub upload_limit: usize,

    /// Maximum number of messages in one sync batch.
    /// Env: `MAX_BATCH_MESSAGES`
    /// Default: `50000`
    pub max_batch_messages: usize,

    /// Maximum content size of a single message in bytes.
    /// Env: `MAX_MESSAGE_BYTES`
    /// Default: 1 MiB
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5006).into(),
            server_files: PathBuf::from("./server-files"),
            user_files: PathBuf::from("./user-files"),
            session_tokens: Vec::new(),
            sync_body_limit: 20 * MIB,
            upload_limit: 50 * MIB,
            max_batch_messages: 50_000,
            max_message_bytes: MIB,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("SERVER_FILES") {
            config.server_files = PathBuf::from(path);
        }

        if let Some(path) = var("USER_FILES") {
            config.user_files = PathBuf::from(path);
        }

        if let Some(tokens) = var("SESSION_TOKENS") {
            config.session_tokens = parse_tokens(&tokens);
        }

        if let Some(n) = parse_count(&var, "SYNC_BODY_LIMIT_MB") {
            config.sync_body_limit = n * MIB;
        }

        if let Some(n) = parse_count(&var, "UPLOAD_LIMIT_MB") {
            config.upload_limit = n * MIB;
        }

        if let Some(n) = parse_count(&var, "MAX_BATCH_MESSAGES") {
            config.max_batch_messages = n;
        }

        if let Some(n) = parse_count(&var, "MAX_MESSAGE_BYTES") {
            config.max_message_bytes = n;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

/// Read a positive integer setting. Zero and garbage keep the default.
fn parse_count(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = var(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid limit, using default");
            None
        }
    }
}

fn parse_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
