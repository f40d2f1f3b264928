//! HS256 session and reset tokens.
//!
//! Compact JWT layout: `base64url(header).base64url(claims).base64url(mac)`.
//! Claims carry the credential version they were issued for so that a
//! password change can revoke every outstanding token without server state.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const ALG_HS256: &str = "HS256";

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
            })
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_unix: i64) -> Self {
        Self {
            now: AtomicI64::new(now_unix),
        }
    }

    pub fn advance(&self, by: Duration) {
        let seconds = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    pub fn set(&self, now_unix: i64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenPurpose {
    Session,
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub ver: i64,
    #[serde(rename = "use")]
    pub purpose: TokenPurpose,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret must not be empty")]
    EmptySecret,
    #[error("token lifetime must be positive")]
    InvalidLifetime,
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub struct TokenService {
    mac: HmacSha256,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"***")
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Key the service with `secret`.
    ///
    /// # Errors
    /// Returns [`TokenError::EmptySecret`] when the secret is empty or blank;
    /// the process must not start without one.
    pub fn new(secret: &SecretString, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        let secret = secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(TokenError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| TokenError::EmptySecret)?;
        Ok(Self { mac, clock })
    }

    #[must_use]
    pub fn now_unix(&self) -> i64 {
        self.clock.now_unix()
    }

    /// Issue a token for `subject` valid for `lifetime` from now.
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidLifetime`] for a zero lifetime.
    pub fn issue(
        &self,
        subject: Uuid,
        credential_version: i64,
        purpose: TokenPurpose,
        lifetime: Duration,
    ) -> Result<String, TokenError> {
        self.issue_at(
            subject,
            credential_version,
            purpose,
            lifetime,
            self.clock.now_unix(),
        )
    }

    /// Same as [`TokenService::issue`] with an explicit issue time.
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidLifetime`] for a zero lifetime.
    pub fn issue_at(
        &self,
        subject: Uuid,
        credential_version: i64,
        purpose: TokenPurpose,
        lifetime: Duration,
        now_unix: i64,
    ) -> Result<String, TokenError> {
        let lifetime = i64::try_from(lifetime.as_secs()).map_err(|_| TokenError::InvalidLifetime)?;
        if lifetime <= 0 {
            return Err(TokenError::InvalidLifetime);
        }
        let claims = Claims {
            sub: subject,
            ver: credential_version,
            purpose,
            iat: now_unix,
            exp: now_unix.saturating_add(lifetime),
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Decoded claims, or `None` for any malformed, tampered or expired token.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<Claims> {
        self.decode(token).ok()
    }

    /// Like [`TokenService::verify`] but keeps the failure reason for logging.
    ///
    /// # Errors
    /// Returns the first check that failed.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_at(token, self.clock.now_unix())
    }

    /// Verify against an explicit "now".
    ///
    /// # Errors
    /// Returns the first check that failed.
    pub fn decode_at(&self, token: &str, now_unix: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALG_HS256 {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.exp <= now_unix {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
