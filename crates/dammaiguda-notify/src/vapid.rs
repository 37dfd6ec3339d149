//! VAPID request signing (RFC 8292).
//!
//! Each push request carries an `Authorization: vapid t=<jwt>, k=<key>`
//! header, where the JWT is an ES256 token whose audience is the push
//! service origin. Tokens are cached per origin and reused until shortly
//! before expiry, so a burst of pushes to the same service signs once.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::SecretKey;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PushError;

/// VAPID token lifetime. RFC 8292 caps it at 24 hours.
const TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;
/// Cached tokens this close to expiry are re-signed instead of reused.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Serialize)]
struct VapidClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Signs push requests with the server's VAPID key pair.
pub struct VapidSigner {
    encoding_key: EncodingKey,
    public_key_b64: String,
    subject: String,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl VapidSigner {
    /// Create a signer from the base64url-encoded raw P-256 private scalar
    /// and the operator contact email.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidKey`] if the key does not decode to a
    /// valid P-256 scalar.
    pub fn from_base64(private_key: &str, contact_email: &str) -> Result<Self, PushError> {
        let raw = URL_SAFE_NO_PAD
            .decode(private_key.trim())
            .map_err(|e| PushError::InvalidKey(format!("private key is not base64url: {e}")))?;
        let secret = SecretKey::from_slice(&raw)
            .map_err(|e| PushError::InvalidKey(format!("not a valid P-256 scalar: {e}")))?;

        let public_point = secret.public_key().to_encoded_point(false);
        let public_key_b64 = URL_SAFE_NO_PAD.encode(public_point.as_bytes());

        // jsonwebtoken ingests PKCS#8 DER, not a raw scalar.
        let der = secret
            .to_pkcs8_der()
            .map_err(|e| PushError::InvalidKey(format!("PKCS#8 encoding failed: {e}")))?;
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        Ok(Self {
            encoding_key,
            public_key_b64,
            subject: format!("mailto:{contact_email}"),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// The base64url uncompressed public key, as served to browsers and
    /// carried in the `k=` parameter.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key_b64
    }

    /// Build the `Authorization` header value for a push endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidKey`] if the endpoint URL has no origin
    /// or signing fails.
    pub fn authorization(&self, endpoint: &str) -> Result<String, PushError> {
        let origin = endpoint_origin(endpoint)?;
        let now = Utc::now().timestamp();

        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(&origin) {
                if cached.expires_at - now > REFRESH_MARGIN_SECS {
                    return Ok(self.header_value(&cached.token));
                }
            }
        }

        let expires_at = now + TOKEN_LIFETIME_SECS;
        let claims = VapidClaims {
            aud: &origin,
            exp: expires_at,
            sub: &self.subject,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::ES256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| PushError::InvalidKey(format!("VAPID signing failed: {e}")))?;

        let header = self.header_value(&token);
        self.cache.lock().insert(
            origin,
            CachedToken {
                token,
                expires_at,
            },
        );
        Ok(header)
    }

    fn header_value(&self, token: &str) -> String {
        format!("vapid t={token}, k={}", self.public_key_b64)
    }
}

/// The scheme-plus-authority origin of a push endpoint URL.
fn endpoint_origin(endpoint: &str) -> Result<String, PushError> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| PushError::InvalidKey(format!("bad endpoint URL: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| PushError::InvalidKey("endpoint URL has no host".to_owned()))?;
    match url.port() {
        Some(port) => Ok(format!("{}://{host}:{port}", url.scheme())),
        None => Ok(format!("{}://{host}", url.scheme())),
    }
}
