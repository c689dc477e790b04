use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoalError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub azure: AzureConfig,
    pub adx: AdxConfig,
    pub store: StoreConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `COAL_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("COAL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            azure: AzureConfig::from_env_profiled(p),
            adx: AdxConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
            monitor: MonitorConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  azure:    tenant={}, client={}, static_token={}",
            self.azure.tenant_id.as_deref().unwrap_or("(none)"),
            self.azure.client_id.as_deref().unwrap_or("(none)"),
            self.azure.access_token.is_some()
        );
        tracing::info!(
            "  adx:      uri={}, database={}",
            self.adx.uri.as_deref().unwrap_or("(none)"),
            self.adx.database.as_deref().unwrap_or("(none)")
        );
        tracing::info!("  store:    dir={}", self.store.dir.display());
        tracing::info!(
            "  monitor:  timeout={}s, retries={}, interval={}s",
            self.monitor.timeout_secs,
            self.monitor.max_retries,
            self.monitor.poll_interval_secs
        );
    }

    /// Return a redacted view safe for display (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "azure": {
                "tenant_id": self.azure.tenant_id,
                "client_id": self.azure.client_id,
                "authority_host": self.azure.authority_host,
                "configured": self.azure.is_configured(),
            },
            "adx": {
                "uri": self.adx.uri,
                "ingest_uri": self.adx.ingest_uri(),
                "database": self.adx.database,
                "configured": self.adx.is_configured(),
            },
            "store": { "dir": self.store.dir },
            "monitor": {
                "timeout_secs": self.monitor.timeout_secs,
                "max_retries": self.monitor.max_retries,
                "poll_interval_secs": self.monitor.poll_interval_secs,
                "max_messages": self.monitor.max_messages,
                "visibility_timeout_secs": self.monitor.visibility_timeout_secs,
            },
        })
    }
}

// ── Azure AD credentials ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-issued bearer token; bypasses the client credentials flow.
    pub access_token: Option<String>,
    pub authority_host: String,
}

impl AzureConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tenant_id: profiled_env_opt(p, "AZURE_TENANT_ID"),
            client_id: profiled_env_opt(p, "AZURE_CLIENT_ID"),
            client_secret: profiled_env_opt(p, "AZURE_CLIENT_SECRET"),
            access_token: profiled_env_opt(p, "AZURE_ACCESS_TOKEN"),
            authority_host: profiled_env_or(
                p,
                "AZURE_AUTHORITY_HOST",
                "https://login.microsoftonline.com",
            ),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
            || (self.tenant_id.is_some()
                && self.client_id.is_some()
                && self.client_secret.is_some())
    }
}

// ── Azure Data Explorer ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdxConfig {
    /// Engine endpoint, e.g. `https://mycluster.westeurope.kusto.windows.net`.
    pub uri: Option<String>,
    /// Ingest endpoint; derived from `uri` when unset.
    pub ingest_uri_override: Option<String>,
    pub database: Option<String>,
}

impl AdxConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            uri: profiled_env_opt(p, "AZURE_DATA_EXPLORER_RESOURCE_URI")
                .map(|u| u.trim_end_matches('/').to_string()),
            ingest_uri_override: profiled_env_opt(p, "AZURE_DATA_EXPLORER_RESOURCE_INGEST_URI")
                .map(|u| u.trim_end_matches('/').to_string()),
            database: profiled_env_opt(p, "AZURE_DATA_EXPLORER_DATABASE_NAME"),
        }
    }

    /// Ingest endpoint: the explicit override, or `ingest-` prefixed to the
    /// engine host.
    pub fn ingest_uri(&self) -> Option<String> {
        if let Some(ref uri) = self.ingest_uri_override {
            return Some(uri.clone());
        }
        self.uri.as_deref().map(derive_ingest_uri)
    }

    pub fn require_uri(&self) -> Result<&str, CoalError> {
        self.uri
            .as_deref()
            .ok_or(CoalError::MissingConfig("AZURE_DATA_EXPLORER_RESOURCE_URI"))
    }

    pub fn require_database(&self) -> Result<&str, CoalError> {
        self.database
            .as_deref()
            .ok_or(CoalError::MissingConfig("AZURE_DATA_EXPLORER_DATABASE_NAME"))
    }

    pub fn is_configured(&self) -> bool {
        self.uri.is_some() && self.database.is_some()
    }
}

fn derive_ingest_uri(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, host)) if !host.starts_with("ingest-") => {
            format!("{}://ingest-{}", scheme, host)
        }
        Some(_) => uri.to_string(),
        None => format!("https://ingest-{}", uri),
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dir: PathBuf::from(profiled_env_or(p, "COAL_STORE_DIR", "coal-store")),
        }
    }
}

// ── Ingestion monitoring ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub poll_interval_secs: u64,
    pub max_messages: u32,
    pub visibility_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            max_retries: 5,
            poll_interval_secs: 8,
            max_messages: 32,
            visibility_timeout_secs: 1,
        }
    }
}

impl MonitorConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            timeout_secs: profiled_env_u64(p, "COAL_INGEST_TIMEOUT_SECS", d.timeout_secs),
            max_retries: profiled_env_u32(p, "COAL_INGEST_POLL_RETRIES", d.max_retries),
            poll_interval_secs: profiled_env_u64(
                p,
                "COAL_INGEST_POLL_INTERVAL_SECS",
                d.poll_interval_secs,
            ),
            max_messages: profiled_env_u32(p, "COAL_INGEST_MAX_MESSAGES", d.max_messages),
            visibility_timeout_secs: profiled_env_u64(
                p,
                "COAL_INGEST_VISIBILITY_TIMEOUT_SECS",
                d.visibility_timeout_secs,
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_uri_is_derived_from_engine_uri() {
        assert_eq!(
            derive_ingest_uri("https://mycluster.westeurope.kusto.windows.net"),
            "https://ingest-mycluster.westeurope.kusto.windows.net"
        );
        assert_eq!(
            derive_ingest_uri("https://ingest-mycluster.kusto.windows.net"),
            "https://ingest-mycluster.kusto.windows.net"
        );
        assert_eq!(
            derive_ingest_uri("mycluster.kusto.windows.net"),
            "https://ingest-mycluster.kusto.windows.net"
        );
    }

    #[test]
    fn ingest_uri_override_wins() {
        let adx = AdxConfig {
            uri: Some("https://a.kusto.windows.net".into()),
            ingest_uri_override: Some("http://localhost:9000".into()),
            database: None,
        };
        assert_eq!(adx.ingest_uri().as_deref(), Some("http://localhost:9000"));
        assert!(adx.require_database().is_err());
    }

    #[test]
    fn profiled_keys_take_precedence() {
        env::set_var("COALCFGTEST_AZURE_DATA_EXPLORER_DATABASE_NAME", "profiled-db");
        env::set_var("COALCFGTEST_COAL_INGEST_POLL_RETRIES", "9");
        let config = Config::for_profile("coalcfgtest");
        assert_eq!(config.profile_label(), "COALCFGTEST");
        assert_eq!(config.adx.database.as_deref(), Some("profiled-db"));
        assert_eq!(config.monitor.max_retries, 9);
        env::remove_var("COALCFGTEST_AZURE_DATA_EXPLORER_DATABASE_NAME");
        env::remove_var("COALCFGTEST_COAL_INGEST_POLL_RETRIES");
    }

    #[test]
    fn monitor_defaults() {
        let m = MonitorConfig::default();
        assert_eq!(m.timeout(), Duration::from_secs(900));
        assert_eq!(m.max_retries, 5);
        assert_eq!(m.poll_interval(), Duration::from_secs(8));
        assert_eq!(m.max_messages, 32);
        assert_eq!(m.visibility_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn azure_configured_with_static_token() {
        let azure = AzureConfig {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            access_token: Some("tok".into()),
            authority_host: "https://login.microsoftonline.com".into(),
        };
        assert!(azure.is_configured());
    }
}
