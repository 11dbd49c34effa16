//! # Azure REST Client
//!
//! Thin REST surface over the three Azure calls the operator needs outside of
//! Terraform: AAD client-credentials tokens, the Key Vault certificate lookup
//! backing the readiness gate, and remote-state blob deletion during teardown.
//!
//! Tokens are fetched per scope and cached until shortly before expiry.

use crate::config::Settings;
use crate::constants::SSL_CERTIFICATE_NAME;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const KEY_VAULT_API_VERSION: &str = "7.4";
const STORAGE_API_VERSION: &str = "2021-08-06";

/// OAuth scope for Key Vault data-plane calls
pub const VAULT_SCOPE: &str = "https://vault.azure.net/.default";
/// OAuth scope for Blob storage data-plane calls
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
/// OAuth scope for Azure SQL token authentication
pub const DATABASE_SCOPE: &str = "https://database.windows.net/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Azure REST client authenticated as the operator's service principal
#[derive(Debug)]
pub struct AzureClient {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    storage_account: String,
    container: String,
    tokens: Mutex<HashMap<&'static str, CachedToken>>,
}

impl AzureClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            tenant_id: settings.arm_tenant_id.clone(),
            client_id: settings.arm_client_id.clone(),
            client_secret: settings.arm_client_secret.clone(),
            storage_account: settings.tf_backend_storage_account.clone(),
            container: settings.tf_backend_container.clone(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a bearer token for the given scope, reusing a cached one while
    /// it has more than a minute of life left.
    pub async fn token(&self, scope: &'static str) -> Result<String> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(scope) {
            if cached.expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(cached.token.clone());
            }
        }

        debug!(scope, "requesting AAD token");
        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| Error::Azure(format!("token request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Azure(format!(
                "token request returned {status}: {body}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Azure(format!("token response: {e}")))?;
        let cached = CachedToken {
            token: body.access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        };
        tokens.insert(scope, cached);
        Ok(body.access_token)
    }

    /// Whether the per-app key vault holds the SSL certificate.
    ///
    /// A missing certificate is a valid negative result, not an error; the
    /// state machine owns the retry policy.
    pub async fn ssl_certificate_exists(&self, vault_name: &str) -> Result<bool> {
        let token = self.token(VAULT_SCOPE).await?;
        let url = certificate_url(vault_name, SSL_CERTIFICATE_NAME);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Azure(format!("key vault request: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Azure(format!(
                    "key vault returned {status} for {url}: {body}"
                )))
            }
        }
    }

    /// Delete the remote state blob for an app so no orphaned state artifact
    /// remains after destroy. A blob that is already gone is fine; teardown
    /// may be retried after a partial failure.
    pub async fn delete_state_blob(&self, state_key: &str) -> Result<()> {
        let token = self.token(STORAGE_SCOPE).await?;
        let url = blob_url(&self.storage_account, &self.container, state_key);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await
            .map_err(|e| Error::Azure(format!("blob delete request: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!(state_key, "state blob already absent");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Azure(format!(
                    "blob delete returned {status} for {url}: {body}"
                )))
            }
        }
    }
}

/// Key Vault URL for a named certificate
fn certificate_url(vault_name: &str, certificate: &str) -> String {
    format!(
        "https://{vault_name}.vault.azure.net/certificates/{certificate}?api-version={KEY_VAULT_API_VERSION}"
    )
}

/// Blob storage URL for a remote state artifact
fn blob_url(account: &str, container: &str, key: &str) -> String {
    format!("https://{account}.blob.core.windows.net/{container}/{key}")
}
