//! Signed, time-limited download tokens for completed export files.
//!
//! A token binds `{job_id, expiry}` under an HMAC-SHA256 signature and is
//! never persisted; it is verified only at download time.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DownloadTokenError {
    #[error("missing download token")]
    Missing,
    #[error("malformed download token")]
    Malformed,
    #[error("token does not match export job")]
    JobMismatch,
    #[error("download token expired")]
    Expired,
    #[error("invalid download token signature")]
    InvalidSignature,
}

#[derive(Clone)]
pub struct DownloadSigner {
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl DownloadSigner {
    /// Signer with a process-local random secret: restarting the service
    /// invalidates outstanding tokens, which is fine for short TTLs.
    pub fn new(ttl: Duration) -> Self {
        Self::with_secret(Uuid::new_v4().to_string().into_bytes(), ttl)
    }

    pub fn with_secret(secret: Vec<u8>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_TOKEN_TTL } else { ttl };
        Self {
            secret: Arc::new(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign(&self, job_id: Uuid, now: DateTime<Utc>) -> String {
        let expires = (now + chrono::Duration::seconds(self.ttl.as_secs() as i64)).timestamp();
        let payload = format!("{}:{}", job_id, expires);
        let signature = URL_SAFE_NO_PAD.encode(self.mac_for(&payload));
        URL_SAFE_NO_PAD.encode(format!("{}:{}", payload, signature))
    }

    /// Constant-time signature check plus job-id and expiry validation.
    pub fn verify(
        &self,
        job_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DownloadTokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DownloadTokenError::Missing);
        }
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| DownloadTokenError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| DownloadTokenError::Malformed)?;

        let parts: Vec<&str> = decoded.split(':').collect();
        if parts.len() != 3 {
            return Err(DownloadTokenError::Malformed);
        }
        if parts[0] != job_id.to_string() {
            return Err(DownloadTokenError::JobMismatch);
        }
        let expires: i64 = parts[1].parse().map_err(|_| DownloadTokenError::Malformed)?;
        if now.timestamp() > expires {
            return Err(DownloadTokenError::Expired);
        }

        let payload = format!("{}:{}", parts[0], parts[1]);
        let provided = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| DownloadTokenError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| DownloadTokenError::InvalidSignature)
    }

    fn mac_for(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
