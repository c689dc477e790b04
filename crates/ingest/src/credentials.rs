//! Azure AD bearer tokens for ADX.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use coal_core::config::AzureConfig;
use coal_core::CoalError;

use crate::error::IngestError;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub enum AzureCredential {
    /// A token obtained elsewhere (e.g. `az account get-access-token`).
    Static(String),
    /// OAuth2 client credentials flow for a service principal.
    ClientSecret {
        authority_host: String,
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl AzureCredential {
    /// Pick a credential from config: a static token wins over a service
    /// principal.
    pub fn from_config(config: &AzureConfig) -> Result<Self, CoalError> {
        if let Some(ref token) = config.access_token {
            return Ok(Self::Static(token.clone()));
        }
        let tenant_id = config
            .tenant_id
            .clone()
            .ok_or(CoalError::MissingConfig("AZURE_TENANT_ID"))?;
        let client_id = config
            .client_id
            .clone()
            .ok_or(CoalError::MissingConfig("AZURE_CLIENT_ID"))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or(CoalError::MissingConfig("AZURE_CLIENT_SECRET"))?;
        Ok(Self::ClientSecret {
            authority_host: config.authority_host.trim_end_matches('/').to_string(),
            tenant_id,
            client_id,
            client_secret,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Hands out bearer tokens per resource, caching them until shortly before
/// expiry.
pub struct TokenProvider {
    http: Client,
    credential: AzureCredential,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: Client, credential: AzureCredential) -> Self {
        Self {
            http,
            credential,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Bearer token for `resource` (e.g. the cluster URI).
    pub async fn token(&self, resource: &str) -> Result<String, IngestError> {
        let (authority_host, tenant_id, client_id, client_secret) = match &self.credential {
            AzureCredential::Static(token) => return Ok(token.clone()),
            AzureCredential::ClientSecret {
                authority_host,
                tenant_id,
                client_id,
                client_secret,
            } => (authority_host, tenant_id, client_id, client_secret),
        };

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(resource) {
            if Instant::now() + EXPIRY_MARGIN < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        debug!(resource, "Requesting Azure AD token");
        let scope = format!("{}/.default", resource.trim_end_matches('/'));
        let url = format!("{}/{}/oauth2/v2.0/token", authority_host, tenant_id);
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        cache.insert(
            resource.to_string(),
            CachedToken {
                token: token.access_token.clone(),
                expires_at: Instant::now() + lifetime,
            },
        );
        Ok(token.access_token)
    }
}
