//! The `AuthUser` extractor.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use dammaiguda_auth::{Identity, TokenVerifier};
use dammaiguda_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated caller, resolved from the `Authorization: Bearer`
/// header.
///
/// REST handlers take this as an argument; a missing or invalid token
/// rejects the request with `unauthenticated` before the handler runs.
/// Guest identities never appear here, only on WebSocket connects.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S, V> FromRequestParts<Arc<AppState<S, V>>> for AuthUser
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S, V>>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated("missing authorization header".to_owned()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthenticated("expected a bearer token".to_owned()))?;
        let identity = state.verifier.verify(token)?;
        Ok(Self(identity))
    }
}
