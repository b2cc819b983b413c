//! Bearer-token authentication for the HTTP transport.
//!
//! When tokens are configured (`--auth-token` / `GOVERNOR_AUTH_TOKENS`), every
//! HTTP request must carry `Authorization: Bearer <token>` matching one of
//! them. Comparison is constant-time. Stdio is never authenticated.

use crate::error::{DbResult, GovernorError};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

const BEARER_PREFIX: &str = "Bearer ";

/// Accepted bearer tokens. Empty means authentication is off.
#[derive(Debug, Clone, Default)]
pub struct BearerAuth {
    tokens: HashSet<String>,
}

impl BearerAuth {
    /// Build from configured tokens. Blank entries are a configuration error.
    pub fn from_tokens(tokens: &[String]) -> DbResult<Self> {
        let mut accepted = HashSet::new();
        for token in tokens {
            let trimmed = token.trim();
            if trimmed.is_empty() {
                return Err(GovernorError::configuration(
                    "GOVERNOR_AUTH_TOKENS contains an empty token",
                ));
            }
            accepted.insert(trimmed.to_string());
        }
        Ok(Self { tokens: accepted })
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Check `provided` against every token without short-circuiting.
    pub fn verify(&self, provided: &str) -> bool {
        self.tokens.iter().fold(false, |found, expected| {
            found | bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
        })
    }
}

/// Axum middleware rejecting requests without a valid bearer token.
pub async fn require_bearer(
    State(auth): State<Arc<BearerAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match bearer_token(request.headers()) {
        Ok(token) if auth.verify(token) => next.run(request).await,
        Ok(token) => {
            warn!(token_prefix = %mask_token(token), "Rejected request with unknown bearer token");
            unauthorized("Invalid bearer token")
        }
        Err(message) => {
            warn!(reason = message, "Rejected unauthenticated request");
            unauthorized(message)
        }
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;

    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or("Expected 'Authorization: Bearer <token>'")?;

    if token.is_empty() {
        return Err("Bearer token is empty");
    }
    Ok(token)
}

fn mask_token(token: &str) -> String {
    match token.get(..3) {
        Some(prefix) if token.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

fn unauthorized(message: &str) -> Response {
    let body = json!({
        "error": {
            "code": "unauthorized",
            "message": message,
        }
    });
    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
