//! Azure Blob Storage backend with service-SAS signing.

use super::{ObjectStore, RetryPolicy};
use crate::error::AuditError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Storage service version the SAS string-to-sign layout follows.
pub const SAS_VERSION: &str = "2022-11-02";

/// Lifetime of the write-only SAS used for a single upload.
const UPLOAD_SAS_MINUTES: i64 = 15;

pub struct AzureBlobStore {
    account: String,
    account_key: String,
    container: String,
    endpoint: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("account", &self.account)
            .field("container", &self.container)
            .field("endpoint", &self.endpoint)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

impl AzureBlobStore {
    /// `account_key` is the base64 storage account key as shown in the portal.
    pub fn new(
        account: impl Into<String>,
        account_key: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        let account = account.into();
        let endpoint = format!("https://{account}.blob.core.windows.net");
        Self {
            account,
            account_key: account_key.into(),
            container: container.into(),
            endpoint,
            retry: RetryPolicy::default(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Build from `AZURE_STORAGE_ACCOUNT`, `AZURE_STORAGE_KEY`,
    /// `AZURE_STORAGE_CONTAINER` (default `documents`) and the optional
    /// `AZURE_STORAGE_ENDPOINT`.
    pub fn from_env() -> Result<Self, AuditError> {
        let account = require_env("AZURE_STORAGE_ACCOUNT")?;
        let key = require_env("AZURE_STORAGE_KEY")?;
        let container =
            std::env::var("AZURE_STORAGE_CONTAINER").unwrap_or_else(|_| "documents".to_string());
        let mut store = Self::new(account, key, container);
        if let Ok(endpoint) = std::env::var("AZURE_STORAGE_ENDPOINT") {
            store = store.with_endpoint(endpoint);
        }
        Ok(store)
    }

    /// Override the blob endpoint (sovereign clouds, emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn blob_url(&self, key: &str) -> Result<reqwest::Url, AuditError> {
        reqwest::Url::parse(&format!("{}/{}/{}", self.endpoint, self.container, key)).map_err(
            |e| AuditError::InvalidConfig(format!("invalid blob url for '{key}': {e}")),
        )
    }

    /// Canonical string-to-sign for a blob service SAS.
    pub(crate) fn string_to_sign(&self, key: &str, permissions: &str, expiry: &str) -> String {
        let resource = format!("/blob/{}/{}/{}", self.account, self.container, key);
        [
            permissions, // sp
            "",          // st
            expiry,      // se
            &resource,
            "",      // si
            "",      // sip
            "https", // spr
            SAS_VERSION,
            "b", // sr
            "",  // snapshot time
            "",  // encryption scope
            "",  // rscc
            "",  // rscd
            "",  // rsce
            "",  // rscl
            "",  // rsct
        ]
        .join("\n")
    }

    fn sign(&self, payload: &str) -> Result<String, AuditError> {
        let secret = STANDARD
            .decode(self.account_key.trim())
            .map_err(|e| AuditError::PermissionDenied {
                detail: format!("storage account key is not valid base64: {e}"),
            })?;
        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|e| {
            AuditError::PermissionDenied {
                detail: e.to_string(),
            }
        })?;
        mac.update(payload.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn sas_url(
        &self,
        key: &str,
        permissions: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<reqwest::Url, AuditError> {
        let expiry = expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let sig = self.sign(&self.string_to_sign(key, permissions, &expiry))?;
        let mut url = self.blob_url(key)?;
        url.query_pairs_mut()
            .append_pair("sv", SAS_VERSION)
            .append_pair("sr", "b")
            .append_pair("sp", permissions)
            .append_pair("spr", "https")
            .append_pair("se", &expiry)
            .append_pair("sig", &sig);
        Ok(url)
    }
}

fn require_env(name: &str) -> Result<String, AuditError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuditError::InvalidConfig(format!("{name} is not set")))
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    fn backend_tag(&self) -> &'static str {
        "azure-blob"
    }

    #[instrument(name = "store_azure_put", skip(self, bytes), fields(len = bytes.len()))]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), AuditError> {
        let upload_url = self.sas_url(
            key,
            "cw",
            Utc::now() + ChronoDuration::minutes(UPLOAD_SAS_MINUTES),
        )?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = self
                .client
                .put(upload_url.clone())
                .header("x-ms-blob-type", "BlockBlob")
                .header("x-ms-version", SAS_VERSION)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes.clone());

            let detail = match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Uploaded {} ({} bytes) on attempt {}", key, bytes.len(), attempt);
                    return Ok(());
                }
                Ok(resp)
                    if resp.status() == StatusCode::UNAUTHORIZED
                        || resp.status() == StatusCode::FORBIDDEN =>
                {
                    return Err(AuditError::PermissionDenied {
                        detail: format!("upload of '{key}' refused with {}", resp.status()),
                    });
                }
                Ok(resp) if !is_transient(resp.status()) => {
                    return Err(AuditError::StorageUnavailable {
                        key: key.to_string(),
                        detail: format!("upload refused with {}", resp.status()),
                    });
                }
                Ok(resp) => format!("status {}", resp.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.retry.max_attempts {
                return Err(AuditError::StorageUnavailable {
                    key: key.to_string(),
                    detail: format!("gave up after {attempt} attempts: {detail}"),
                });
            }
            warn!("Upload of {} failed (attempt {}): {}", key, attempt, detail);
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, AuditError> {
        let url = self.sas_url(key, "r", expires_at)?;
        info!("Signed read URL for {}/{} until {}", self.container, key, expires_at);
        Ok(url.into())
    }
}
