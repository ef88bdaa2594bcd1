//! Run settings and API credentials, built once in `main` and passed down explicitly.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::query::DEFAULT_QUERY_LIMIT;

pub const DEFAULT_CREDENTIALS_PATH: &str = "./.twitter_keys.yaml";
pub const SEARCH_YAML_KEY: &str = "search_tweets_api_fullarchive";
pub const COUNT_YAML_KEY: &str = "count_tweets_api_fullarchive";
pub const DEFAULT_ACCOUNT_TYPE: &str = "premium";

const SANDBOX_QUERY_LIMIT: usize = 256;

const ENV_ENDPOINT: &str = "SEARCHTWEETS_ENDPOINT";
const ENV_BEARER_TOKEN: &str = "SEARCHTWEETS_BEARER_TOKEN";
const ENV_CONSUMER_KEY: &str = "SEARCHTWEETS_CONSUMER_KEY";
const ENV_CONSUMER_SECRET: &str = "SEARCHTWEETS_CONSUMER_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read credentials file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid credentials file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("credentials key '{0}' not found in credentials file")]
    MissingKey(String),

    #[error("no endpoint configured (set `endpoint` or SEARCHTWEETS_ENDPOINT)")]
    MissingEndpoint,

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("no bearer token or consumer key/secret pair configured")]
    MissingAuth,

    #[error("unsupported account type '{0}': expected 'premium' or 'enterprise'")]
    AccountType(String),

    #[error("counts endpoint is not available in sandbox environments")]
    CountsUnavailable,
}

/// Limits applied to every run. Sandbox environments are heavily restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub sandbox: bool,
    pub query_limit: usize,
    pub max_pages: Option<u32>,
    pub max_results: Option<u64>,
    pub results_per_call: u32,
}

impl Settings {
    pub fn new(sandbox: bool) -> Self {
        if sandbox {
            Self::sandbox()
        } else {
            Self::premium()
        }
    }

    pub fn premium() -> Self {
        Self {
            sandbox: false,
            query_limit: DEFAULT_QUERY_LIMIT,
            max_pages: None,
            max_results: None,
            results_per_call: 500,
        }
    }

    pub fn sandbox() -> Self {
        Self {
            sandbox: true,
            query_limit: SANDBOX_QUERY_LIMIT,
            max_pages: Some(1),
            max_results: Some(100),
            results_per_call: 100,
        }
    }

    pub fn with_query_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.query_limit = limit;
        }
        self
    }

    pub fn require_counts(&self) -> Result<(), ConfigError> {
        if self.sandbox {
            return Err(ConfigError::CountsUnavailable);
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::premium()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Only premium and enterprise accounts reach the full-archive endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountType {
    Premium,
    Enterprise,
}

impl AccountType {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(ConfigError::AccountType(s.to_string())),
        }
    }
}

/// How requests authenticate: a ready bearer token, or an app key pair exchanged for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Bearer(Secret),
    ConsumerKey { key: Secret, secret: Secret },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub endpoint: Url,
    pub auth: Auth,
}

#[derive(Debug, Default, Deserialize)]
struct RawCredentials {
    endpoint: Option<String>,
    account_type: Option<String>,
    bearer_token: Option<String>,
    consumer_key: Option<String>,
    consumer_secret: Option<String>,
}

impl RawCredentials {
    fn overwrite_from_env(&mut self) {
        let var = |name: &str| {
            env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = var(ENV_ENDPOINT) {
            self.endpoint = Some(v);
        }
        if let Some(v) = var(ENV_BEARER_TOKEN) {
            self.bearer_token = Some(v);
        }
        if let Some(v) = var(ENV_CONSUMER_KEY) {
            self.consumer_key = Some(v);
        }
        if let Some(v) = var(ENV_CONSUMER_SECRET) {
            self.consumer_secret = Some(v);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Credentials {
    /// Load the section under `yaml_key` of a YAML credentials file.
    ///
    /// With `env_overwrite`, `SEARCHTWEETS_*` environment variables take precedence over file values.
    pub fn load(
        path: &Path,
        yaml_key: &str,
        account_type: &str,
        env_overwrite: bool,
    ) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let creds = Self::from_yaml(&content, yaml_key, account_type, env_overwrite)?;
        debug!(
            path = %path.display(),
            key = yaml_key,
            endpoint = %creds.endpoint,
            "credentials loaded"
        );
        Ok(creds)
    }

    pub fn from_yaml(
        content: &str,
        yaml_key: &str,
        account_type: &str,
        env_overwrite: bool,
    ) -> Result<Self, ConfigError> {
        let mut sections: HashMap<String, RawCredentials> = serde_yaml::from_str(content)?;
        let mut raw = sections
            .remove(yaml_key)
            .ok_or_else(|| ConfigError::MissingKey(yaml_key.to_string()))?;
        if env_overwrite {
            raw.overwrite_from_env();
        }
        Self::from_raw(raw, account_type)
    }

    fn from_raw(raw: RawCredentials, account_type: &str) -> Result<Self, ConfigError> {
        AccountType::parse(raw.account_type.as_deref().unwrap_or(account_type))?;

        let endpoint = non_empty(raw.endpoint).ok_or(ConfigError::MissingEndpoint)?;
        let endpoint = parse_endpoint(&endpoint)?;

        let auth = match (
            non_empty(raw.bearer_token),
            non_empty(raw.consumer_key),
            non_empty(raw.consumer_secret),
        ) {
            (Some(token), _, _) => Auth::Bearer(Secret::new(token)),
            (None, Some(key), Some(secret)) => Auth::ConsumerKey {
                key: Secret::new(key),
                secret: Secret::new(secret),
            },
            _ => return Err(ConfigError::MissingAuth),
        };

        Ok(Self { endpoint, auth })
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}
