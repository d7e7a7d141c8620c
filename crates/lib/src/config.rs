//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.becky/config.json`) and environment.
//! Every section is optional; missing keys fall back to defaults that match a local
//! development setup (gateway on 127.0.0.1:5000, inference service on 127.0.0.1:8000).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::render::ThemeMode;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Upstream "Becky AI" inference service.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Session token signing.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Document store and bug report log locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Terminal chat client settings.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Gateway bind, port, CORS and upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP API (default 5000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Browser origins allowed to call the API with credentials. Empty disables CORS.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Largest accepted request body, attachments included (default 50 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Where chat turns are forwarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Base URL of the inference API, e.g. "http://127.0.0.1:8000/api". Overridden by BECKY_API_URL env.
    pub base_url: Option<String>,
    /// Token forwarded as `auth_token` when the caller sends none. Overridden by BECKY_API_TOKEN env.
    pub auth_token: Option<String>,
}

/// Session token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// HMAC secret for session tokens. Overridden by BECKY_JWT_SECRET env.
    pub jwt_secret: Option<String>,

    /// Cookie carrying the session token (default "userToken").
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Lifetime of tokens issued by `becky token` (default 24 hours).
    #[serde(default = "default_token_lifetime_hours")]
    pub token_lifetime_hours: i64,
}

/// File locations. Relative paths are resolved against the config file's parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Document store file (default `store.json` next to the config file).
    pub store_path: Option<PathBuf>,
    /// Append-only bug report log (default `logs/bug-reports.log` next to the config file).
    pub bug_report_log: Option<PathBuf>,
}

/// Terminal chat client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Gateway URL the client talks to. Defaults to the configured bind and port.
    pub server_url: Option<String>,

    /// Seconds a turn may stay open before it is failed with a timeout message.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Theme used when expanding templated assistant messages.
    #[serde(default)]
    pub theme: ThemeMode,
}

const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000/api";

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:8080".to_string(),
        "http://localhost:5001".to_string(),
        "http://localhost:5000".to_string(),
    ]
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_cookie_name() -> String {
    "userToken".to_string()
}

fn default_token_lifetime_hours() -> i64 {
    24
}

fn default_turn_timeout_secs() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            allowed_origins: default_allowed_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            cookie_name: default_cookie_name(),
            token_lifetime_hours: default_token_lifetime_hours(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            turn_timeout_secs: default_turn_timeout_secs(),
            theme: ThemeMode::default(),
        }
    }
}

/// Non-empty, trimmed value of an environment variable.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the session token secret: env BECKY_JWT_SECRET overrides config.
pub fn resolve_jwt_secret(config: &Config) -> Option<String> {
    env_override("BECKY_JWT_SECRET").or_else(|| non_empty(config.auth.jwt_secret.as_ref()))
}

/// Resolve the upstream base URL: env BECKY_API_URL overrides config; trailing slashes removed.
pub fn resolve_upstream_url(config: &Config) -> String {
    env_override("BECKY_API_URL")
        .or_else(|| non_empty(config.upstream.base_url.as_ref()))
        .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the fallback upstream token: env BECKY_API_TOKEN overrides config.
pub fn resolve_upstream_token(config: &Config) -> Option<String> {
    env_override("BECKY_API_TOKEN").or_else(|| non_empty(config.upstream.auth_token.as_ref()))
}

/// Gateway URL for the chat client: explicit `client.serverUrl` or `http://bind:port`.
pub fn resolve_server_url(config: &Config) -> String {
    match non_empty(config.client.server_url.as_ref()) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("http://{}:{}", config.gateway.bind.trim(), config.gateway.port),
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BECKY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".becky").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Directory holding the config file ("." when the path has no parent).
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

fn resolve_relative(config_path: &Path, configured: Option<&PathBuf>, default: &str) -> PathBuf {
    let base = config_dir(config_path);
    match configured {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        }
        _ => base.join(default),
    }
}

/// Resolve the document store file.
pub fn resolve_store_path(config: &Config, config_path: &Path) -> PathBuf {
    resolve_relative(config_path, config.storage.store_path.as_ref(), "store.json")
}

/// Resolve the bug report log file.
pub fn resolve_bug_report_log(config: &Config, config_path: &Path) -> PathBuf {
    resolve_relative(
        config_path,
        config.storage.bug_report_log.as_ref(),
        "logs/bug-reports.log",
    )
}

/// Load config from the default path (or BECKY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving relative storage paths).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
