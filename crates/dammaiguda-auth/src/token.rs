//! Token verification and claims extraction.

use crate::error::{AuthError, Result};
use crate::identity::{Identity, Role};
use dammaiguda_core::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Trait for resolving a credential into an identity.
///
/// Implementations must be side-effect free; they are called on every
/// request and on every WebSocket connect.
pub trait TokenVerifier: Send + Sync {
    /// Verify a token and extract the caller identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, has an invalid
    /// signature, or has expired.
    fn verify(&self, token: &str) -> Result<Identity>;
}

/// Raw claims from a session token before validation.
#[derive(Debug, Deserialize)]
struct RawClaims {
    /// Subject: the opaque user id.
    sub: String,
    /// Display name.
    name: String,
    /// Role claim: `citizen`, `manager`, or `admin`.
    role: String,
    /// Neighborhood area, if assigned.
    #[serde(default)]
    area_id: Option<String>,
    /// Expiration timestamp (validated by jsonwebtoken).
    #[allow(dead_code)]
    exp: u64,
    /// Issued-at timestamp (validated by jsonwebtoken).
    #[allow(dead_code)]
    iat: u64,
}

/// HS256 verifier against the shared secret issued by the auth service.
pub struct HmacVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl HmacVerifier {
    /// Create a verifier from the shared secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.leeway = 30;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for HmacVerifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        let token_data = decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;
        let user_id = UserId::parse(&claims.sub).map_err(|_| AuthError::InvalidUserId)?;
        let role =
            Role::from_claim(&claims.role).ok_or_else(|| AuthError::UnknownRole(claims.role.clone()))?;

        Ok(Identity {
            user_id,
            name: claims.name,
            role,
            area_id: claims.area_id,
        })
    }
}

/// A mock verifier for testing.
///
/// Accepts tokens in the format `test-token:<user_id>:<role>` and derives a
/// display name from the user id.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct MockVerifier {
    /// Area assigned to all verified identities.
    pub area_id: Option<String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl TokenVerifier for MockVerifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        let rest = token.strip_prefix("test-token:").ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<user_id>:<role>".to_owned())
        })?;

        let (user_id, role) = rest.split_once(':').ok_or_else(|| {
            AuthError::InvalidToken("expected test-token:<user_id>:<role>".to_owned())
        })?;

        let role = Role::from_claim(role).ok_or_else(|| AuthError::UnknownRole(role.to_owned()))?;
        let user_id = UserId::parse(user_id).map_err(|_| AuthError::InvalidUserId)?;

        Ok(Identity {
            name: format!("Test {user_id}"),
            user_id,
            role,
            area_id: self.area_id.clone(),
        })
    }
}
