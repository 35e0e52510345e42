//! Configuration loading.
//!
//! Three inputs, all read once at startup:
//! - `api_config.yml`: base URL, endpoint paths, image and polling settings
//! - `creds.yml`: base64 `user:pass` token and content type
//! - request templates: one JSON file per operation in the requests directory
//!
//! Missing `api_config.yml`/`creds.yml` is fatal. A missing template or
//! endpoint only makes the corresponding step skip.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};

pub const API_CONFIG_FILE: &str = "api_config.yml";
pub const CREDS_FILE: &str = "creds.yml";

/// Template files looked up in the requests directory (without `.json`).
pub const TEMPLATE_NAMES: [&str; 6] = [
    "create_repository",
    "create_policy",
    "create_watch",
    "apply_watch",
    "check_scan_status",
    "verify_violations",
];

/// One API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub path: String,
}

/// Image used by the push step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageConfig {
    /// Public image pulled before tagging.
    pub reference: String,
    /// Image name inside the target repository.
    #[serde(alias = "name")]
    pub target_name: String,
    /// Tag pushed to the target repository.
    #[serde(alias = "tag")]
    pub target_tag: String,
    /// Whether to query the local image size after pulling.
    pub inspect_size: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            reference: "hello-world:latest".to_string(),
            target_name: "loadtest".to_string(),
            target_tag: "latest".to_string(),
            inspect_size: true,
        }
    }
}

/// Polling for the scan-status step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanPollConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for ScanPollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_ms: 2_000,
        }
    }
}

/// Contents of `api_config.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,

    /// Registry host for `docker push`; defaults to the base URL's host.
    #[serde(default)]
    pub registry_host: Option<String>,

    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,

    #[serde(default = "default_measurement")]
    pub measurement: String,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub scan_poll: ScanPollConfig,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_container_timeout")]
    pub container_timeout_secs: u64,

    /// Container CLI executable.
    #[serde(default = "default_container_tool")]
    pub container_tool: String,
}

fn default_measurement() -> String {
    regload_metrics::DEFAULT_MEASUREMENT.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_container_timeout() -> u64 {
    300
}

fn default_container_tool() -> String {
    "docker".to_string()
}

impl ApiConfig {
    /// Minimal config pointing at `base_url` with no endpoints.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            registry_host: None,
            endpoints: BTreeMap::new(),
            measurement: default_measurement(),
            image: ImageConfig::default(),
            scan_poll: ScanPollConfig::default(),
            request_timeout_secs: default_request_timeout(),
            container_timeout_secs: default_container_timeout(),
            container_tool: default_container_tool(),
        }
    }

    pub fn with_endpoint(mut self, name: &str, path: &str) -> Self {
        self.endpoints.insert(
            name.to_string(),
            Endpoint {
                path: path.to_string(),
            },
        );
        self
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name).filter(|e| !e.path.trim().is_empty())
    }

    /// Host used to address the container registry.
    pub fn resolve_registry_host(&self) -> ConfigResult<String> {
        if let Some(host) = self.registry_host.as_deref().filter(|h| !h.is_empty()) {
            return Ok(host.to_string());
        }
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| ConfigError::Parse {
            path: "base_url".to_string(),
            reason: e.to_string(),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::Missing("host in base_url".to_string()))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

/// Contents of `creds.yml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// base64 of `username:password`
    pub auth_token: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl Credentials {
    pub fn new(auth_token: &str) -> Self {
        Self {
            auth_token: auth_token.to_string(),
            content_type: default_content_type(),
        }
    }

    /// Build from a username and password.
    pub fn from_user_pass(username: &str, password: &str) -> Self {
        Self::new(&STANDARD.encode(format!("{username}:{password}")))
    }

    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("Basic {}", self.auth_token)
    }

    /// Decode the token into `(username, password)`.
    pub fn basic_auth(&self) -> ConfigResult<(String, String)> {
        let invalid = |reason: &str| ConfigError::Parse {
            path: "auth_token".to_string(),
            reason: reason.to_string(),
        };
        let decoded = STANDARD
            .decode(self.auth_token.trim())
            .map_err(|_| invalid("not valid base64"))?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid("not valid UTF-8"))?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or_else(|| invalid("expected username:password"))?;
        if user.is_empty() {
            return Err(invalid("empty username"));
        }
        Ok((user.to_string(), pass.to_string()))
    }
}

/// Request templates keyed by operation name.
#[derive(Debug, Clone, Default)]
pub struct RequestTemplates {
    templates: BTreeMap<String, Value>,
}

impl RequestTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, template: Value) -> Self {
        self.templates.insert(name.to_string(), template);
        self
    }

    /// Load every known template from `dir`.
    ///
    /// Absent files are left out (their steps will skip); unparsable files
    /// are an error.
    pub fn load_dir(dir: &Path) -> ConfigResult<Self> {
        let mut templates = BTreeMap::new();
        for name in TEMPLATE_NAMES {
            let path = dir.join(format!("{name}.json"));
            if !path.exists() {
                warn!(template = name, path = %path.display(), "Request template not found");
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| parse_error(&path, e))?;
            let value: Value = serde_json::from_str(&raw).map_err(|e| parse_error(&path, e))?;
            templates.insert(name.to_string(), value);
        }
        Ok(Self { templates })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.templates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Everything the workflow needs from disk.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub api: ApiConfig,
    pub credentials: Credentials,
    pub templates: RequestTemplates,
}

impl LoadConfig {
    /// Read `api_config.yml` and `creds.yml` from `config_dir` and the
    /// templates from `requests_dir`.
    pub fn load(config_dir: &Path, requests_dir: &Path) -> ConfigResult<Self> {
        let api: ApiConfig = read_yaml(&config_dir.join(API_CONFIG_FILE))?;
        let credentials: Credentials = read_yaml(&config_dir.join(CREDS_FILE))?;
        let templates = RequestTemplates::load_dir(requests_dir)?;

        info!(
            base_url = %api.base_url,
            endpoints = api.endpoints.len(),
            templates = templates.len(),
            "Configuration loaded"
        );

        Ok(Self {
            api,
            credentials,
            templates,
        })
    }
}

/// Parse a required YAML file.
pub fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| parse_error(path, e))?;
    serde_yaml::from_str(&raw).map_err(|e| parse_error(path, e))
}

fn parse_error(path: &Path, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        path: PathBuf::from(path).display().to_string(),
        reason: e.to_string(),
    }
}
