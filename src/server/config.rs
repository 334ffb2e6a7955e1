//! Configuration loading for ecached.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag or `ECACHED_CONFIG`)
//! 2. `./config.toml`
//! 3. `~/.endpoint-cache/config.toml` (user)
//! 4. `/etc/endpoint-cache/config.toml` (system)
//!
//! When no file is found the defaults below are used. Environment variables
//! are applied on top with [`Config::apply_env`].

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::counter::{CounterConfig, KvStore};
use crate::policy::PolicySource;
use crate::upstream::FailoverTarget;
use crate::{GatewayError, Result};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub counter: CounterSection,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Listener addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// RPC facade address (default: 0.0.0.0:5001).
    #[serde(default = "default_rpc_address")]
    pub rpc_address: String,
    /// REST facade address (default: 0.0.0.0:5000).
    #[serde(default = "default_rest_address")]
    pub rest_address: String,
    #[serde(default = "default_true")]
    pub rest_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_address: default_rpc_address(),
            rest_address: default_rest_address(),
            rest_enabled: true,
        }
    }
}

fn default_rpc_address() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_rest_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_true() -> bool {
    true
}

/// Upstream node endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default)]
    pub backup_rpc_url: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub backup_rest_url: Option<String>,
    /// Websocket endpoint of the primary, e.g. `ws://node:26657/websocket`.
    #[serde(default)]
    pub rpc_websocket: Option<String>,
    #[serde(default)]
    pub backup_rpc_websocket: Option<String>,
    /// Per-attempt timeout in seconds (default: 5).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Swap primary and backup at startup.
    #[serde(default)]
    pub use_backup_as_primary: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            backup_rpc_url: None,
            rest_url: None,
            backup_rest_url: None,
            rpc_websocket: None,
            backup_rpc_websocket: None,
            timeout_secs: default_timeout_secs(),
            use_backup_as_primary: false,
        }
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:26657".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

/// Which cache store backs the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// Cache store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_rpc_prefix")]
    pub rpc_prefix: String,
    #[serde(default = "default_rest_prefix")]
    pub rest_prefix: String,
    /// Capacity of the memory backend.
    #[serde(default)]
    pub max_entries: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            rpc_prefix: default_rpc_prefix(),
            rest_prefix: default_rest_prefix(),
            max_entries: None,
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_rpc_prefix() -> String {
    "rpc".to_string()
}

fn default_rest_prefix() -> String {
    "rest".to_string()
}

/// Where the policy document lives.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policy_path")]
    pub path: PathBuf,
    /// Download the document from here when `path` does not exist yet.
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: default_policy_path(),
            remote_url: None,
        }
    }
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("cache_times.json")
}

/// Call counter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_flush_every")]
    pub flush_every: u64,
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for CounterSection {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_every: default_flush_every(),
            store_name: default_store_name(),
            dir: default_store_dir(),
        }
    }
}

fn default_flush_every() -> u64 {
    crate::counter::DEFAULT_FLUSH_EVERY
}

fn default_store_name() -> String {
    "node_store".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("kvstores")
}

/// Administrative endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Shared secret for `/stats` and `/reload`. Empty leaves them open.
    #[serde(default)]
    pub stats_password: String,
}

/// Websocket relay settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Close a session after this many seconds without a frame in either
    /// direction.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first existing file of
    /// `./config.toml`, `~/.endpoint-cache/config.toml` and
    /// `/etc/endpoint-cache/config.toml` is used, or the defaults if none
    /// exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            GatewayError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(GatewayError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(Some(local));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".endpoint-cache").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/endpoint-cache/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are ignored. Booleans are true when the value starts
    /// with `t` or `T`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("RPC_URL") {
            self.upstream.rpc_url = v;
        }
        if let Some(v) = var("BACKUP_RPC_URL") {
            self.upstream.backup_rpc_url = Some(v);
        }
        if let Some(v) = var("REST_URL") {
            self.upstream.rest_url = Some(v);
        }
        if let Some(v) = var("BACKUP_REST_URL") {
            self.upstream.backup_rest_url = Some(v);
        }
        if let Some(v) = var("RPC_WEBSOCKET") {
            self.upstream.rpc_websocket = Some(v);
        }
        if let Some(v) = var("BACKUP_RPC_WEBSOCKET") {
            self.upstream.backup_rpc_websocket = Some(v);
        }
        if let Some(v) = var("USE_BACKUP_AS_PRIMARY") {
            self.upstream.use_backup_as_primary = env_bool(&v);
        }
        if let Some(v) = var("REDIS_URL") {
            self.cache.redis_url = v;
            self.cache.backend = CacheBackend::Redis;
        }
        if let Some(v) = var("STATS_PASSWORD") {
            self.admin.stats_password = v;
        }
        if let Some(v) = var("REMOTE_CONFIG_TIME_FILE") {
            self.policy.remote_url = Some(v);
        }
        if let Some(v) = var("ENABLE_COUNTER") {
            self.counter.enabled = env_bool(&v);
        }
        if let Some(v) = var("INCREASE_COUNTER_EVERY") {
            self.counter.flush_every = parse_env("INCREASE_COUNTER_EVERY", &v)?;
        }
        if let Some(v) = var("STORE_NAME") {
            self.counter.store_name = v;
        }
        if let Some(v) = var("RPC_PORT") {
            let port: u16 = parse_env("RPC_PORT", &v)?;
            self.server.rpc_address = with_port(&self.server.rpc_address, port)?;
        }
        if let Some(v) = var("REST_PORT") {
            let port: u16 = parse_env("REST_PORT", &v)?;
            self.server.rest_address = with_port(&self.server.rest_address, port)?;
        }
        Ok(())
    }

    pub fn rpc_address(&self) -> Result<SocketAddr> {
        parse_addr("rpc_address", &self.server.rpc_address)
    }

    pub fn rest_address(&self) -> Result<SocketAddr> {
        parse_addr("rest_address", &self.server.rest_address)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs.max(1))
    }

    /// RPC primary/backup pair, swapped when `use_backup_as_primary` is set.
    pub fn rpc_target(&self) -> Result<FailoverTarget> {
        build_target(
            Some(&self.upstream.rpc_url),
            self.upstream.backup_rpc_url.as_deref(),
            self.upstream.use_backup_as_primary,
            &["http", "https"],
        )
        .and_then(|t| {
            t.ok_or_else(|| GatewayError::Configuration("rpc_url is required".to_string()))
        })
    }

    /// REST primary/backup pair, if a REST upstream is configured.
    pub fn rest_target(&self) -> Result<Option<FailoverTarget>> {
        build_target(
            self.upstream.rest_url.as_deref(),
            self.upstream.backup_rest_url.as_deref(),
            self.upstream.use_backup_as_primary,
            &["http", "https"],
        )
    }

    /// Websocket endpoint to relay to, after the backup swap.
    pub fn websocket_url(&self) -> Result<Option<String>> {
        let target = build_target(
            self.upstream.rpc_websocket.as_deref(),
            self.upstream.backup_rpc_websocket.as_deref(),
            self.upstream.use_backup_as_primary,
            &["ws", "wss"],
        )?;
        Ok(target.map(|t| t.primary))
    }

    pub fn policy_source(&self) -> PolicySource {
        let source = PolicySource::local(&self.policy.path);
        match &self.policy.remote_url {
            Some(url) => source.with_remote(url),
            None => source,
        }
    }

    pub fn counter_config(&self) -> CounterConfig {
        CounterConfig {
            enabled: self.counter.enabled,
            flush_every: self.counter.flush_every,
        }
    }

    pub fn counter_store(&self) -> KvStore {
        KvStore::new(&self.counter.store_name, &self.counter.dir)
    }
}

fn env_bool(value: &str) -> bool {
    value.trim().to_ascii_lowercase().starts_with('t')
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GatewayError::Configuration(format!("Invalid {name} '{value}': {e}")))
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| GatewayError::Configuration(format!("Invalid {field} '{value}': {e}")))
}

fn with_port(address: &str, port: u16) -> Result<String> {
    let mut addr = parse_addr("address", address)?;
    addr.set_port(port);
    Ok(addr.to_string())
}

fn validate_url(value: &str, schemes: &[&str]) -> Result<String> {
    let url = url::Url::parse(value)
        .map_err(|e| GatewayError::Configuration(format!("Invalid URL '{value}': {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(GatewayError::Configuration(format!(
            "URL '{value}' must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn build_target(
    primary: Option<&str>,
    backup: Option<&str>,
    swap: bool,
    schemes: &[&str],
) -> Result<Option<FailoverTarget>> {
    let primary = primary.map(|u| validate_url(u, schemes)).transpose()?;
    let backup = backup.map(|u| validate_url(u, schemes)).transpose()?;

    let (primary, backup) = match (primary, backup) {
        (Some(p), Some(b)) if swap => (b, Some(p)),
        (Some(p), b) => (p, b),
        (None, Some(b)) => (b, None),
        (None, None) => return Ok(None),
    };

    let target = FailoverTarget::new(primary);
    Ok(Some(match backup {
        Some(b) => target.with_backup(b),
        None => target,
    }))
}
