use std::collections::BTreeMap;

use diretto_store::{DirettoStoreError, SlotConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Pool alias holding user records
pub const USERS: &str = "users";

/// Pool alias holding every other metadata record
pub const ENTRIES: &str = "entries";

/// Errors that prevent a node from starting
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A configuration value is missing or unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Opening the configured connections failed
    #[error("Failed to open the document store: {0}")]
    Store(#[from] DirettoStoreError),
}

/// Node configuration, shared by the metadata, storage and feed services.
///
/// Every section has defaults, so a partial document deserializes. Reading
/// the document from disk is left to the embedding binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capability token settings
    pub security: SecurityConfig,
    /// Metadata service settings
    pub api: ApiConfig,
    /// Storage service settings
    pub media: MediaConfig,
    /// Feed service settings
    pub feed: FeedConfig,
    /// Public description of this deployment
    pub deployment: DeploymentConfig,
    /// Credential cache settings
    pub auth: AuthConfig,
    /// Pool alias to table and connection count
    pub pool: PoolConfig,
    /// Accepted MIME types
    pub media_types: MediaTypes,
}

/// Capability token settings.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// The secret shared by every node of the deployment
    pub key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig").finish_non_exhaustive()
    }
}

/// Metadata service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Public base URI, ending in a slash
    pub uri: String,
    /// Rows per page of paginated listings
    pub page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:8001/".into(),
            page_size: 100,
        }
    }
}

/// Storage service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Public base URI, ending in a slash
    pub uri: String,
    /// Largest body the storage service accepts, in bytes
    pub max_size: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:8002/".into(),
            max_size: 64 * 1024 * 1024,
        }
    }
}

/// Feed service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Public base URI, ending in a slash
    pub uri: String,
    /// Entries per feed page
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:8003/".into(),
            page_size: 10,
        }
    }
}

/// Public description of this deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Human readable title
    pub title: String,
    /// Contact address of the operators
    pub contact: String,
    /// Website of the deployment
    pub website: String,
    /// Whether anyone may register an account
    pub allow_new_users: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            title: "diretto".into(),
            contact: String::new(),
            website: String::new(),
            allow_new_users: true,
        }
    }
}

/// Credential cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Cached credentials at most
    pub cache_size: usize,
    /// Seconds a cached credential stays valid
    pub lease_secs: u64,
    /// Seconds between sweeps of expired credentials, 0 to only expire
    /// them on lookup
    pub sweep_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_size: diretto_credentials::AUTH_CACHE_SIZE,
            lease_secs: diretto_credentials::AUTH_CACHE_LEASE.as_secs(),
            sweep_secs: 60,
        }
    }
}

/// Pool alias to slot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolConfig(pub BTreeMap<String, SlotConfig>);

impl Default for PoolConfig {
    fn default() -> Self {
        Self(BTreeMap::from([
            (USERS.to_string(), SlotConfig::new(USERS, 1)),
            (ENTRIES.to_string(), SlotConfig::new(ENTRIES, 1)),
        ]))
    }
}

/// How the deployment handles one MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    /// Coarse media kind recorded on documents, like `image`
    pub kind: String,
    /// File extension of stored blobs, with the leading dot
    pub extension: String,
    /// Largest accepted attachment, in bytes
    pub max_size: u64,
}

impl MediaType {
    /// Describe a MIME type
    pub fn new(kind: impl Into<String>, extension: impl Into<String>, max_size: u64) -> Self {
        Self {
            kind: kind.into(),
            extension: extension.into(),
            max_size,
        }
    }
}

/// Accepted MIME types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaTypes(pub BTreeMap<String, MediaType>);

impl MediaTypes {
    /// Settings for `mime`, if it is accepted
    pub fn get(&self, mime: &str) -> Option<&MediaType> {
        self.0.get(mime)
    }
}

impl Default for MediaTypes {
    fn default() -> Self {
        const MB: u64 = 1024 * 1024;
        Self(BTreeMap::from([
            ("image/jpeg".into(), MediaType::new("image", ".jpg", 16 * MB)),
            ("image/png".into(), MediaType::new("image", ".png", 16 * MB)),
            ("video/mp4".into(), MediaType::new("video", ".mp4", 64 * MB)),
            ("audio/mpeg".into(), MediaType::new("audio", ".mp3", 32 * MB)),
            ("text/plain".into(), MediaType::new("text", ".txt", MB)),
        ]))
    }
}

/// Parsed public base URIs of the three services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Metadata service
    pub api: Url,
    /// Storage service
    pub media: Url,
    /// Feed service
    pub feed: Url,
}

impl Config {
    /// Check the configuration and parse its service URIs.
    pub fn validate(&self) -> Result<Endpoints, ConfigurationError> {
        if self.security.key.is_empty() {
            return Err(ConfigurationError::Invalid(
                "security.key must not be empty".into(),
            ));
        }

        for alias in [USERS, ENTRIES] {
            match self.pool.0.get(alias) {
                Some(slot) if slot.connections > 0 => {}
                _ => {
                    return Err(ConfigurationError::Invalid(format!(
                        "pool.{alias} needs at least one connection"
                    )));
                }
            }
        }

        if self.api.page_size == 0 || self.feed.page_size == 0 {
            return Err(ConfigurationError::Invalid(
                "page sizes must be positive".into(),
            ));
        }

        Ok(Endpoints {
            api: base_uri("api.uri", &self.api.uri)?,
            media: base_uri("media.uri", &self.media.uri)?,
            feed: base_uri("feed.uri", &self.feed.uri)?,
        })
    }
}

fn base_uri(field: &str, value: &str) -> Result<Url, ConfigurationError> {
    let uri = Url::parse(value)
        .map_err(|error| ConfigurationError::Invalid(format!("{field}: {error}")))?;
    if uri.cannot_be_a_base() || !uri.path().ends_with('/') {
        return Err(ConfigurationError::Invalid(format!(
            "{field} must be a base URI ending in a slash"
        )));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            security: SecurityConfig {
                key: "s3cr3t".into(),
            },
            ..Config::default()
        }
    }

    #[test]
    fn it_accepts_the_defaults_with_a_secret() -> anyhow::Result<()> {
        let endpoints = config().validate()?;
        assert_eq!(endpoints.media.as_str(), "http://localhost:8002/");
        Ok(())
    }

    #[test]
    fn it_requires_a_shared_secret() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn it_requires_both_pool_aliases() {
        let mut config = config();
        config.pool.0.remove(USERS);
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.pool.0.insert(ENTRIES.into(), SlotConfig::new(ENTRIES, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn it_rejects_unusable_uris() {
        let mut config = config();
        config.media.uri = "not a uri".into();
        assert!(config.validate().is_err());

        config.media.uri = "http://localhost:8002/media".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn it_fills_missing_sections_with_defaults() -> anyhow::Result<()> {
        let config: Config = serde_json::from_str(
            r#"{
                "security": { "key": "s3cr3t" },
                "media_types": {
                    "image/png": { "kind": "image", "extension": ".png", "max_size": 2048 }
                },
                "pool": { "users": { "table": "users", "connections": 1 },
                          "entries": { "table": "entries", "connections": 4 } }
            }"#,
        )?;

        assert_eq!(config.auth, AuthConfig::default());
        assert_eq!(config.auth.cache_size, 1000);
        assert_eq!(config.auth.lease_secs, 120);
        assert_eq!(config.auth.sweep_secs, 60);
        assert_eq!(config.pool.0[ENTRIES].connections, 4);
        assert_eq!(config.media_types.get("image/png").map(|t| t.max_size), Some(2048));
        assert!(config.media_types.get("image/jpeg").is_none());
        config.validate()?;
        Ok(())
    }

    #[test]
    fn it_keeps_the_secret_out_of_debug_output() {
        assert!(!format!("{:?}", config()).contains("s3cr3t"));
    }
}
