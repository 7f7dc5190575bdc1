//! Session gate for the `/sync` routes.
//!
//! Account management lives outside the relay; all it needs to know is
//! whether a token is acceptable. [`SessionValidator`] is the seam, and
//! [`StaticTokens`] is the implementation driven by `SESSION_TOKENS`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::ServerError;

pub const TOKEN_HEADER: &str = "x-actual-token";

pub trait SessionValidator: Send + Sync {
    fn is_valid(&self, token: &str) -> bool;
}

/// A fixed set of accepted tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: Vec<String>,
}

impl StaticTokens {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }
}

impl SessionValidator for StaticTokens {
    fn is_valid(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        // Compare against every entry so timing does not reveal which matched.
        let mut found = 0u8;
        for expected in &self.tokens {
            let expected = expected.as_bytes();
            if expected.len() == token.len() {
                found |= expected.ct_eq(token.as_bytes()).unwrap_u8();
            }
        }
        found == 1
    }
}

/// Token from `x-actual-token`, or a bearer `Authorization` header.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token);
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
}

pub async fn require_session(
    State(validator): State<Arc<dyn SessionValidator>>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let authorized = extract_token(request.headers())
        .map(|token| validator.is_valid(token))
        .unwrap_or(false);

    if !authorized {
        debug!(path = %request.uri().path(), "Rejected request without a valid session");
        return Err(ServerError::Unauthorized);
    }

    Ok(next.run(request).await)
}
