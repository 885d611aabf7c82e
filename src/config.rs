//! Configuration management for oidc-session
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::auth::discovery::{is_loopback, DiscoveryPolicy};
use crate::auth::exchange::{ClientCredentials, CredentialStyle};
use crate::auth::session::{FileSessionStore, MemorySessionStore, SessionTokenStore};
use crate::error::{IdentityError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Main configuration structure for oidc-session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Authorization server and discovery settings
    #[serde(default)]
    pub authority: AuthorityConfig,
    /// Client registration
    #[serde(default)]
    pub client: ClientConfig,
    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Session persistence
    #[serde(default)]
    pub session: SessionConfig,
}

/// Authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Base address of the authorization server
    #[serde(default)]
    pub base_url: String,

    /// Require HTTPS for discovery and every advertised endpoint
    #[serde(default = "default_true")]
    pub require_https: bool,

    /// Exempt localhost / loopback addresses from the HTTPS requirement
    #[serde(default = "default_true")]
    pub allow_http_on_loopback: bool,

    /// Require the advertised issuer to match the base address
    #[serde(default = "default_true")]
    pub validate_issuer_name: bool,

    /// Require every endpoint to live on the base address's authority
    #[serde(default = "default_true")]
    pub validate_endpoints: bool,

    /// Discovery cache lifetime; 0 disables caching
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            require_https: true,
            allow_http_on_loopback: true,
            validate_issuer_name: true,
            validate_endpoints: true,
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

impl AuthorityConfig {
    /// Parses the base address.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|e| {
            IdentityError::Config(format!("Invalid authority.base_url '{}': {}", self.base_url, e))
                .into()
        })
    }

    /// Discovery policy described by this section.
    pub fn policy(&self) -> DiscoveryPolicy {
        DiscoveryPolicy {
            require_https: self.require_https,
            allow_http_on_loopback: self.allow_http_on_loopback,
            validate_issuer_name: self.validate_issuer_name,
            validate_endpoints: self.validate_endpoints,
        }
    }
}

/// Client registration at the authorization server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth client identifier
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Scopes requested at sign-in
    #[serde(default)]
    pub scope: Option<String>,

    /// Client authentication method (basic or post)
    #[serde(default)]
    pub credential_style: CredentialStyle,
}

impl ClientConfig {
    /// Credentials handed to the exchanger.
    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scope: self.scope.clone().filter(|s| !s.trim().is_empty()),
            style: self.credential_style,
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Where session records live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process; lost on exit
    Memory,
    /// One JSON file per session
    #[default]
    File,
}

/// Session persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Directory for the file store; platform data dir when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Re-fetch user info after each renewal
    #[serde(default)]
    pub refresh_claims_on_renew: bool,
}

impl SessionConfig {
    /// Opens the configured session store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file store directory cannot be determined or
    /// created.
    pub fn open_store(&self) -> Result<Arc<dyn SessionTokenStore>> {
        match self.store {
            StoreKind::Memory => Ok(Arc::new(MemorySessionStore::new())),
            StoreKind::File => {
                let directory = match &self.directory {
                    Some(dir) => dir.clone(),
                    None => FileSessionStore::default_directory().ok_or_else(|| {
                        IdentityError::Config(
                            "Cannot determine a data directory; set session.directory".to_string(),
                        )
                    })?,
                };
                tracing::debug!("Using file session store at {}", directory.display());
                Ok(Arc::new(FileSessionStore::new(directory)?))
            }
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IdentityError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| IdentityError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("OIDC_SESSION_BASE_URL") {
            self.authority.base_url = base_url;
        }

        if let Ok(client_id) = std::env::var("OIDC_SESSION_CLIENT_ID") {
            self.client.client_id = client_id;
        }

        if let Ok(client_secret) = std::env::var("OIDC_SESSION_CLIENT_SECRET") {
            self.client.client_secret = client_secret;
        }

        if let Ok(scope) = std::env::var("OIDC_SESSION_SCOPE") {
            self.client.scope = Some(scope);
        }

        if let Ok(require_https) = std::env::var("OIDC_SESSION_REQUIRE_HTTPS") {
            match parse_bool(&require_https) {
                Some(value) => self.authority.require_https = value,
                None => tracing::warn!("Invalid OIDC_SESSION_REQUIRE_HTTPS: {}", require_https),
            }
        }

        if let Ok(ttl) = std::env::var("OIDC_SESSION_CACHE_TTL_SECONDS") {
            if let Ok(value) = ttl.parse() {
                self.authority.cache_ttl_seconds = value;
            } else {
                tracing::warn!("Invalid OIDC_SESSION_CACHE_TTL_SECONDS: {}", ttl);
            }
        }

        if let Ok(timeout) = std::env::var("OIDC_SESSION_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.http.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid OIDC_SESSION_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(dir) = std::env::var("OIDC_SESSION_STORE_DIR") {
            self.session.directory = Some(PathBuf::from(dir));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(authority) = &cli.authority {
            tracing::debug!("Using authority override: {}", authority);
            self.authority.base_url = authority.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Config`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.authority.base_url.trim().is_empty() {
            return Err(IdentityError::Config(
                "authority.base_url must be set (or OIDC_SESSION_BASE_URL)".to_string(),
            )
            .into());
        }

        let base = self.authority.base_url()?;
        if base.cannot_be_a_base() || base.host().is_none() {
            return Err(IdentityError::Config(format!(
                "authority.base_url must be an absolute http(s) URL: {}",
                base
            ))
            .into());
        }

        if !matches!(base.scheme(), "http" | "https") {
            return Err(IdentityError::Config(format!(
                "authority.base_url has unsupported scheme: {}",
                base.scheme()
            ))
            .into());
        }

        if self.authority.require_https
            && base.scheme() != "https"
            && !(self.authority.allow_http_on_loopback && is_loopback(&base))
        {
            return Err(IdentityError::Config(format!(
                "authority.base_url must use https when require_https is set: {}",
                base
            ))
            .into());
        }

        if self.client.client_id.trim().is_empty() {
            return Err(IdentityError::Config("client.client_id cannot be empty".to_string()).into());
        }

        if self.http.timeout_seconds == 0 {
            return Err(IdentityError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
