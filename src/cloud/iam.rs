//! Bearer credential issuance and caching.
//!
//! A PS256-signed service-account JWT is exchanged for a short-lived bearer
//! token. The cache is the single process-wide owner of that token: the
//! moderation and generation paths both borrow it through one shared
//! `CredentialCache`.

use crate::engine::traits::CredentialIssuer;
use crate::error::CredentialError;
use crate::types::Credential;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Nominal lifetime requested for an issued token.
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before nominal expiry.
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 100;

#[derive(Debug, Serialize)]
struct IssueClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize)]
struct IssueRequest {
    jwt: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(rename = "iamToken")]
    iam_token: String,
    #[serde(rename = "expiresAt")]
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// HTTP credential issuer: signs a service-account JWT and exchanges it
/// for a bearer token.
pub struct IamTokenIssuer {
    iam_url: String,
    service_account_id: String,
    key_id: String,
    signing_key: EncodingKey,
    http: reqwest::Client,
    read_timeout: std::time::Duration,
}

impl IamTokenIssuer {
    pub fn new(
        iam_url: &str,
        service_account_id: &str,
        key_id: &str,
        private_key_pem: &[u8],
        connect_timeout: std::time::Duration,
        read_timeout: std::time::Duration,
    ) -> Result<Self, CredentialError> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| CredentialError(format!("invalid private key: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CredentialError(format!("http client: {e}")))?;

        Ok(Self {
            iam_url: iam_url.to_string(),
            service_account_id: service_account_id.to_string(),
            key_id: key_id.to_string(),
            signing_key,
            http,
            read_timeout,
        })
    }

    fn signed_assertion(&self) -> Result<String, CredentialError> {
        let now = Utc::now().timestamp();
        let claims = IssueClaims {
            aud: &self.iam_url,
            iss: &self.service_account_id,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::PS256);
        header.kid = Some(self.key_id.clone());

        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| CredentialError(format!("jwt signing: {e}")))
    }
}

#[async_trait]
impl CredentialIssuer for IamTokenIssuer {
    async fn issue(&self) -> Result<Credential, CredentialError> {
        let assertion = self.signed_assertion()?;

        let resp = self
            .http
            .post(&self.iam_url)
            .timeout(self.read_timeout)
            .json(&IssueRequest { jwt: assertion })
            .send()
            .await
            .map_err(|e| CredentialError(format!("issue request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CredentialError(format!("issue failed ({status}): {body}")));
        }

        let body: IssueResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError(format!("issue response: {e}")))?;

        // The issuer's own expiry wins when present; otherwise assume the
        // nominal lifetime we asked for.
        let expires_at = body
            .expires_at
            .unwrap_or_else(|| Utc::now() + Duration::seconds(TOKEN_LIFETIME_SECS));

        info!("bearer credential issued, expires {}", expires_at);
        Ok(Credential {
            token: body.iam_token,
            expires_at,
        })
    }
}

/// Lazily-refreshed, single-flight credential cache.
///
/// The slot mutex is held across the issuance call: concurrent callers block
/// on the in-flight refresh and then read the fresh credential, so at most
/// one issuance request is ever outstanding per process.
pub struct CredentialCache {
    issuer: Arc<dyn CredentialIssuer>,
    slot: Mutex<Option<Credential>>,
    margin: Duration,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self {
            issuer,
            slot: Mutex::new(None),
            margin: Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS),
        }
    }

    /// Current credential, refreshed if absent or within the safety margin
    /// of expiry.
    pub async fn get(&self) -> Result<Credential, CredentialError> {
        let mut slot = self.slot.lock().await;

        if let Some(cred) = slot.as_ref() {
            if !cred.expires_within(self.margin) {
                debug!("credential cache hit");
                return Ok(cred.clone());
            }
            debug!("credential near expiry, refreshing");
        }

        let fresh = self.issuer.issue().await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIssuer {
        calls: AtomicUsize,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl CredentialIssuer for CountingIssuer {
        async fn issue(&self) -> Result<Credential, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so a concurrent get() can race into the cache.
            tokio::task::yield_now().await;
            Ok(Credential {
                token: format!("token-{n}"),
                expires_at: Utc::now() + Duration::seconds(self.lifetime_secs),
            })
        }
    }

    fn issuer(lifetime_secs: i64) -> Arc<CountingIssuer> {
        Arc::new(CountingIssuer {
            calls: AtomicUsize::new(0),
            lifetime_secs,
        })
    }

    #[tokio::test]
    async fn concurrent_gets_issue_once() {
        let counting = issuer(3600);
        let cache = Arc::new(CredentialCache::new(counting.clone()));

        let (a, b) = tokio::join!(cache.get(), cache.get());
        assert_eq!(a.unwrap().token, b.unwrap().token);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_credential_is_reused() {
        let counting = issuer(3600);
        let cache = CredentialCache::new(counting.clone());

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn near_expiry_triggers_refresh() {
        // Lifetime shorter than the 100 s safety margin: always refreshed.
        let counting = issuer(30);
        let cache = CredentialCache::new(counting.clone());

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }
}
