//! Web-Push payload encryption (RFC 8291 `aes128gcm`).
//!
//! The browser hands us a P-256 public key (`p256dh`) and a 16-byte auth
//! secret per subscription. Each payload is encrypted as a single
//! `aes128gcm` record (RFC 8188) under keys derived from an ephemeral
//! ECDH agreement, and the full coding header is prepended so the body is
//! self-contained.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::PushError;

/// Record size written into the coding header. One record carries the
/// whole payload.
const RECORD_SIZE: u32 = 4096;

/// Largest cleartext that still fits a single record once the coding
/// header, pad delimiter, and GCM tag are accounted for.
pub const MAX_PLAINTEXT: usize = 3992;

/// Encrypt `plaintext` for the subscription identified by its base64url
/// `p256dh` public key and `auth` secret. Returns the complete
/// `aes128gcm` body including the coding header.
///
/// # Errors
///
/// Returns [`PushError::InvalidKey`] for undecodable subscription keys,
/// [`PushError::PayloadTooLarge`] when the cleartext exceeds
/// [`MAX_PLAINTEXT`], and [`PushError::Crypto`] if encryption fails.
pub fn encrypt(p256dh: &str, auth: &str, plaintext: &[u8]) -> Result<Vec<u8>, PushError> {
    if plaintext.len() > MAX_PLAINTEXT {
        return Err(PushError::PayloadTooLarge {
            size: plaintext.len(),
            limit: MAX_PLAINTEXT,
        });
    }

    let ua_public_bytes = URL_SAFE_NO_PAD
        .decode(p256dh.trim())
        .map_err(|e| PushError::InvalidKey(format!("p256dh is not base64url: {e}")))?;
    let ua_public = PublicKey::from_sec1_bytes(&ua_public_bytes)
        .map_err(|e| PushError::InvalidKey(format!("p256dh is not a P-256 point: {e}")))?;
    let auth_secret = URL_SAFE_NO_PAD
        .decode(auth.trim())
        .map_err(|e| PushError::InvalidKey(format!("auth secret is not base64url: {e}")))?;
    if auth_secret.len() != 16 {
        return Err(PushError::InvalidKey(format!(
            "auth secret must be 16 bytes, got {}",
            auth_secret.len()
        )));
    }

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = PublicKey::from(&as_secret);
    let as_public_bytes = as_public.to_encoded_point(false);
    let shared = as_secret.diffie_hellman(&ua_public);

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let (key, nonce) = derive_keys(
        &auth_secret,
        shared.raw_secret_bytes().as_slice(),
        &ua_public_bytes,
        as_public_bytes.as_bytes(),
        &salt,
    )?;

    // Single record: pad delimiter 0x02 marks the last record.
    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&key)
        .map_err(|e| PushError::Crypto(format!("bad CEK length: {e}")))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &record,
                aad: &[],
            },
        )
        .map_err(|e| PushError::Crypto(format!("AES-GCM encryption failed: {e}")))?;

    // Coding header: salt (16) || rs (4, BE) || idlen (1) || keyid.
    let keyid = as_public_bytes.as_bytes();
    let mut body = Vec::with_capacity(16 + 4 + 1 + keyid.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(u8::try_from(keyid.len()).map_err(|_| {
        PushError::Crypto("public key too long for keyid field".to_owned())
    })?);
    body.extend_from_slice(keyid);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

/// RFC 8291 key derivation: the auth-secret HKDF yields the input keying
/// material, then the salt HKDF yields the 16-byte CEK and 12-byte nonce.
fn derive_keys(
    auth_secret: &[u8],
    shared_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), PushError> {
    let mut key_info = Vec::with_capacity(14 + ua_public.len() + as_public.len());
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(&key_info, &mut ikm)
        .map_err(|e| PushError::Crypto(format!("IKM derivation failed: {e}")))?;

    let hkdf = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut key = [0u8; 16];
    hkdf.expand(b"Content-Encoding: aes128gcm\0", &mut key)
        .map_err(|e| PushError::Crypto(format!("CEK derivation failed: {e}")))?;
    let mut nonce = [0u8; 12];
    hkdf.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(|e| PushError::Crypto(format!("nonce derivation failed: {e}")))?;
    Ok((key, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;

    struct BrowserKeys {
        secret: SecretKey,
        p256dh: String,
        auth: String,
        auth_raw: [u8; 16],
    }

    fn browser_keys() -> BrowserKeys {
        let secret = SecretKey::random(&mut OsRng);
        let p256dh =
            URL_SAFE_NO_PAD.encode(secret.public_key().to_encoded_point(false).as_bytes());
        let mut auth_raw = [0u8; 16];
        OsRng.fill_bytes(&mut auth_raw);
        let auth = URL_SAFE_NO_PAD.encode(auth_raw);
        BrowserKeys {
            secret,
            p256dh,
            auth,
            auth_raw,
        }
    }

    /// Decrypt an `aes128gcm` body the way a user agent would.
    fn decrypt(keys: &BrowserKeys, body: &[u8]) -> Vec<u8> {
        let salt = &body[..16];
        let rs = u32::from_be_bytes(body[16..20].try_into().unwrap());
        assert_eq!(rs, RECORD_SIZE);
        let idlen = body[20] as usize;
        assert_eq!(idlen, 65);
        let as_public_bytes = &body[21..21 + idlen];
        let ciphertext = &body[21 + idlen..];

        let as_public = PublicKey::from_sec1_bytes(as_public_bytes).unwrap();
        let shared = p256::ecdh::diffie_hellman(
            keys.secret.to_nonzero_scalar(),
            as_public.as_affine(),
        );
        let ua_public_bytes = keys.secret.public_key().to_encoded_point(false);
        let (key, nonce) = derive_keys(
            &keys.auth_raw,
            shared.raw_secret_bytes().as_slice(),
            ua_public_bytes.as_bytes(),
            as_public_bytes,
            salt,
        )
        .unwrap();

        let cipher = Aes128Gcm::new_from_slice(&key).unwrap();
        let mut record = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .unwrap();
        assert_eq!(record.pop(), Some(0x02));
        record
    }

    #[test]
    fn browser_can_decrypt_what_we_encrypt() {
        let keys = browser_keys();
        let plaintext = br#"{"title":"SOS from Lakshmi","body":"Need help near the park"}"#;
        let body = encrypt(&keys.p256dh, &keys.auth, plaintext).unwrap();
        assert_eq!(decrypt(&keys, &body), plaintext.to_vec());
    }

    #[test]
    fn each_encryption_uses_fresh_material() {
        let keys = browser_keys();
        let a = encrypt(&keys.p256dh, &keys.auth, b"hello").unwrap();
        let b = encrypt(&keys.p256dh, &keys.auth, b"hello").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&keys, &a), b"hello");
        assert_eq!(decrypt(&keys, &b), b"hello");
    }

    #[test]
    fn oversized_payload_is_refused() {
        let keys = browser_keys();
        let big = vec![0u8; MAX_PLAINTEXT + 1];
        assert!(matches!(
            encrypt(&keys.p256dh, &keys.auth, &big),
            Err(PushError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn bad_subscription_keys_are_refused() {
        let keys = browser_keys();
        assert!(matches!(
            encrypt("not base64!", &keys.auth, b"x"),
            Err(PushError::InvalidKey(_))
        ));
        let short_auth = URL_SAFE_NO_PAD.encode([0u8; 4]);
        assert!(matches!(
            encrypt(&keys.p256dh, &short_auth, b"x"),
            Err(PushError::InvalidKey(_))
        ));
    }
}
