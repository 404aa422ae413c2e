//! JWT-based authentication extractor for Axum handlers.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use journal_core::error::CoreError;
use journal_core::roles::ROLE_ADMIN;
use journal_core::types::DbId;
use journal_pipeline::engine::Requester;
use serde::Deserialize;

use crate::auth::jwt::validate_token;
use crate::error::AppError;
use crate::state::AppState;

/// Authenticated caller extracted from a JWT.
///
/// The token is read from the `Authorization: Bearer` header. Browsers
/// cannot set headers on a WebSocket upgrade, so a `token` query parameter
/// is accepted when the header is absent.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The owner's account id (from `claims.sub`).
    pub user_id: DbId,
    /// Role name (e.g. `"admin"`, `"creator"`).
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// The engine's view of this caller.
    pub fn requester(&self) -> Requester {
        Requester {
            owner_id: self.user_id,
            is_admin: self.is_admin(),
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn unauthorized(msg: &str) -> AppError {
    AppError::Core(CoreError::Unauthorized(msg.into()))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get("authorization") {
            Some(header) => header
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    unauthorized("Invalid Authorization format. Expected: Bearer <token>")
                })?
                .to_string(),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .ok_or_else(|| unauthorized("Missing Authorization header"))?,
        };

        let claims = validate_token(&token, &state.config.jwt)
            .map_err(|_| unauthorized("Invalid or expired token"))?;

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}
