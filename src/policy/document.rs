//! Policy document format and source.
//!
//! The document maps endpoint patterns to cache lifetimes in seconds:
//!
//! ```json
//! {
//!   "DEFAULT": 6,
//!   "rpc": { "genesis": 3600, "^abci_info$": 30, "block_search": -1 },
//!   "rest": { "cosmos/bank/v1beta1/balances/*": 12 },
//!   "coingecko": { "prices": 6 }
//! }
//! ```
//!
//! Key order inside `rpc` and `rest` is the match order. Negative values
//! disable an endpoint; zero is rejected.
//!
//! # Remote documents
//!
//! When [`PolicySource::remote_url`] is set and no local copy exists yet,
//! the document is downloaded once and written to [`PolicySource::path`].
//! Every later load, including reloads, reads the local copy.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{GatewayError, Result};

/// TTL used when a document has no `DEFAULT` entry.
pub const DEFAULT_CACHE_SECONDS: i64 = 6;

/// Raw policy document, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "DEFAULT", default = "default_cache_seconds")]
    pub default: i64,
    #[serde(default)]
    pub rpc: IndexMap<String, i64>,
    #[serde(default)]
    pub rest: IndexMap<String, i64>,
    /// Price feed lifetimes. Carried for `/cache_info`, not used for routing.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub coingecko: IndexMap<String, serde_json::Value>,
}

fn default_cache_seconds() -> i64 {
    DEFAULT_CACHE_SECONDS
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            default: DEFAULT_CACHE_SECONDS,
            rpc: IndexMap::new(),
            rest: IndexMap::new(),
            coingecko: IndexMap::new(),
        }
    }
}

impl PolicyDocument {
    /// Parse a document from JSON text.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| GatewayError::Configuration(format!("failed to parse policy JSON: {e}")))
    }
}

/// Where the policy document lives.
#[derive(Debug, Clone)]
pub struct PolicySource {
    /// Local document path.
    pub path: PathBuf,
    /// Optional URL to seed `path` from when it does not exist.
    pub remote_url: Option<String>,
}

impl PolicySource {
    /// A source backed only by a local file.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remote_url: None,
        }
    }

    /// Set the remote URL used to seed the local copy.
    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Load the document, downloading it first if needed.
    pub async fn load(&self) -> Result<PolicyDocument> {
        if let Some(url) = &self.remote_url
            && !self.path.exists()
        {
            info!(%url, path = %self.path.display(), "downloading policy document");
            let body = fetch_remote(url).await?;
            // Validate before it lands on disk.
            PolicyDocument::parse(&body)?;
            save_local(&self.path, &body)?;
        }
        read_local(&self.path)
    }
}

/// Read and parse a local policy document.
pub fn read_local(path: &Path) -> Result<PolicyDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::Configuration(format!(
            "failed to read policy document {}: {e}",
            path.display()
        ))
    })?;
    PolicyDocument::parse(&content)
}

/// Write a document body to disk (atomic write via tmp + rename).
pub fn save_local(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            GatewayError::Configuration(format!(
                "failed to create policy dir {}: {e}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, body).map_err(|e| {
        GatewayError::Configuration(format!(
            "failed to write policy file {}: {e}",
            tmp_path.display()
        ))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        GatewayError::Configuration(format!(
            "failed to rename policy file {} → {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

/// Fetch a policy document body from a remote URL.
pub async fn fetch_remote(url: &str) -> Result<String> {
    let response = reqwest::get(url).await.map_err(|e| {
        GatewayError::Configuration(format!("failed to fetch policy from {url}: {e}"))
    })?;

    if !response.status().is_success() {
        return Err(GatewayError::Configuration(format!(
            "policy fetch returned HTTP {}",
            response.status()
        )));
    }

    response.text().await.map_err(|e| {
        GatewayError::Configuration(format!("failed to read policy response body: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_pattern_order() {
        let doc = PolicyDocument::parse(
            r#"{"DEFAULT": 6, "rpc": {"zeta": 1, "alpha": 2, "mid*": 3}}"#,
        )
        .unwrap();
        let keys: Vec<&str> = doc.rpc.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid*"]);
    }

    #[test]
    fn missing_sections_default() {
        let doc = PolicyDocument::parse("{}").unwrap();
        assert_eq!(doc.default, DEFAULT_CACHE_SECONDS);
        assert!(doc.rpc.is_empty());
        assert!(doc.rest.is_empty());
    }

    #[test]
    fn coingecko_is_carried() {
        let doc = PolicyDocument::parse(r#"{"coingecko": {"prices": 6}}"#).unwrap();
        assert_eq!(doc.coingecko["prices"], serde_json::json!(6));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = PolicyDocument::parse("{not json").unwrap_err();
        assert!(err.to_string().contains("failed to parse policy JSON"));
    }

    #[test]
    fn read_missing_file_is_configuration_error() {
        let err = read_local(Path::new("/nonexistent/cache_times.json")).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache_times.json");
        save_local(&path, r#"{"DEFAULT": 9}"#).unwrap();
        assert_eq!(read_local(&path).unwrap().default, 9);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
