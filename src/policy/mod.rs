//! Per-endpoint cache lifetime policies.
//!
//! A [`PolicyDocument`] is compiled into an immutable [`PolicyTable`].
//! [`PolicyStore`] holds the current table behind an [`ArcSwap`]: resolvers
//! take the latest snapshot without locking, and [`PolicyStore::reload()`]
//! installs a freshly compiled table in one pointer swap. A resolution
//! therefore sees either the old table or the new one, never a mix.

pub mod document;
pub mod pattern;

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{info, warn};

use crate::{GatewayError, Result};

pub use document::{PolicyDocument, PolicySource};
pub use pattern::EndpointPattern;

/// Which facade a query arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Request/response RPC interface.
    Rpc,
    /// REST-style HTTP interface.
    Rest,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Rest => "rest",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved cache lifetime for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Cache for this many seconds (always > 0).
    Seconds(u64),
    /// Endpoint must be rejected before any upstream call.
    Disabled,
}

impl Ttl {
    /// Interpret a raw document value: negative disables, zero is invalid.
    pub fn from_raw(seconds: i64) -> Result<Self> {
        match seconds {
            s if s < 0 => Ok(Self::Disabled),
            0 => Err(GatewayError::Configuration(
                "cache lifetime of 0 seconds is not allowed; use a negative value to disable"
                    .to_string(),
            )),
            s => Ok(Self::Seconds(s as u64)),
        }
    }

    /// Lifetime in seconds, or `None` when disabled.
    pub fn seconds(self) -> Option<u64> {
        match self {
            Self::Seconds(s) => Some(s),
            Self::Disabled => None,
        }
    }

    pub fn is_disabled(self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// One pattern → lifetime rule.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub pattern: EndpointPattern,
    pub ttl: Ttl,
}

/// Compiled, immutable policy snapshot.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: Ttl,
    rpc: Vec<EndpointPolicy>,
    rest: Vec<EndpointPolicy>,
    document: PolicyDocument,
}

impl PolicyTable {
    /// Compile a document. Fails on empty patterns or zero lifetimes.
    pub fn compile(document: PolicyDocument) -> Result<Self> {
        let default = Ttl::from_raw(document.default)?;
        let rpc = compile_section(&document.rpc)?;
        let rest = compile_section(&document.rest)?;
        Ok(Self {
            default,
            rpc,
            rest,
            document,
        })
    }

    /// Resolve the lifetime for `path`: first matching rule wins, otherwise
    /// the document default.
    pub fn resolve(&self, path: &str, protocol: Protocol) -> Ttl {
        self.policies(protocol)
            .iter()
            .find(|p| p.pattern.matches(path))
            .map(|p| p.ttl)
            .unwrap_or(self.default)
    }

    /// Ordered rules for a protocol.
    pub fn policies(&self, protocol: Protocol) -> &[EndpointPolicy] {
        match protocol {
            Protocol::Rpc => &self.rpc,
            Protocol::Rest => &self.rest,
        }
    }

    pub fn default_ttl(&self) -> Ttl {
        self.default
    }

    /// The document this table was compiled from.
    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            default: Ttl::Seconds(document::DEFAULT_CACHE_SECONDS as u64),
            rpc: Vec::new(),
            rest: Vec::new(),
            document: PolicyDocument::default(),
        }
    }
}

fn compile_section(section: &indexmap::IndexMap<String, i64>) -> Result<Vec<EndpointPolicy>> {
    section
        .iter()
        .map(|(pattern, seconds)| {
            let ttl = Ttl::from_raw(*seconds).map_err(|e| {
                GatewayError::Configuration(format!("pattern '{pattern}': {e}"))
            })?;
            Ok(EndpointPolicy {
                pattern: EndpointPattern::compile(pattern)?,
                ttl,
            })
        })
        .collect()
}

/// Reloadable holder of the current [`PolicyTable`].
pub struct PolicyStore {
    current: ArcSwap<PolicyTable>,
    source: Option<PolicySource>,
}

impl PolicyStore {
    /// Load and compile the document from `source`.
    ///
    /// Any failure here is fatal to startup; there is no degraded mode.
    pub async fn load(source: PolicySource) -> Result<Self> {
        let table = PolicyTable::compile(source.load().await?)?;
        info!(
            path = %source.path.display(),
            rpc_rules = table.rpc.len(),
            rest_rules = table.rest.len(),
            "loaded cache policy"
        );
        Ok(Self {
            current: ArcSwap::from_pointee(table),
            source: Some(source),
        })
    }

    /// A store with a fixed table and no source to reload from.
    pub fn fixed(table: PolicyTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
            source: None,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<PolicyTable> {
        self.current.load_full()
    }

    /// Resolve against the current snapshot.
    pub fn resolve(&self, path: &str, protocol: Protocol) -> Ttl {
        self.current.load().resolve(path, protocol)
    }

    /// Raw document behind the current snapshot.
    pub fn document(&self) -> PolicyDocument {
        self.current.load().document().clone()
    }

    /// Replace the current table.
    pub fn install(&self, table: PolicyTable) {
        self.current.store(Arc::new(table));
    }

    /// Re-read the source and swap in the new table.
    ///
    /// On failure the previous table stays installed.
    pub async fn reload(&self) -> Result<Arc<PolicyTable>> {
        let Some(source) = &self.source else {
            return Ok(self.snapshot());
        };

        let table = match source.load().await.and_then(PolicyTable::compile) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                warn!(path = %source.path.display(), error = %e, "policy reload failed, keeping previous table");
                return Err(e);
            }
        };
        self.current.store(Arc::clone(&table));
        info!(path = %source.path.display(), "reloaded cache policy");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(json: &str) -> PolicyTable {
        PolicyTable::compile(PolicyDocument::parse(json).unwrap()).unwrap()
    }

    #[test]
    fn ttl_from_raw() {
        assert_eq!(Ttl::from_raw(30).unwrap(), Ttl::Seconds(30));
        assert_eq!(Ttl::from_raw(-1).unwrap(), Ttl::Disabled);
        assert!(Ttl::from_raw(0).is_err());
    }

    #[test]
    fn first_match_wins() {
        let t = table(r#"{"DEFAULT": 6, "rpc": {"block*": 10, "block_results": 99}}"#);
        assert_eq!(t.resolve("block_results", Protocol::Rpc), Ttl::Seconds(10));
    }

    #[test]
    fn falls_back_to_default() {
        let t = table(r#"{"DEFAULT": 7, "rpc": {"genesis": 3600}}"#);
        assert_eq!(t.resolve("status", Protocol::Rpc), Ttl::Seconds(7));
    }

    #[test]
    fn protocols_are_separate() {
        let t = table(r#"{"DEFAULT": 6, "rpc": {"genesis": 3600}, "rest": {"genesis": -1}}"#);
        assert_eq!(t.resolve("genesis", Protocol::Rpc), Ttl::Seconds(3600));
        assert_eq!(t.resolve("genesis", Protocol::Rest), Ttl::Disabled);
    }

    #[test]
    fn disabled_default() {
        let t = table(r#"{"DEFAULT": -1}"#);
        assert!(t.resolve("anything", Protocol::Rest).is_disabled());
    }

    #[test]
    fn zero_rule_names_pattern() {
        let err = PolicyTable::compile(
            PolicyDocument::parse(r#"{"rpc": {"status": 0}}"#).unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'status'"));
    }

    #[test]
    fn install_swaps_whole_table() {
        let store = PolicyStore::fixed(table(r#"{"DEFAULT": 6}"#));
        let before = store.snapshot();
        store.install(table(r#"{"DEFAULT": 60}"#));
        assert_eq!(before.resolve("x", Protocol::Rpc), Ttl::Seconds(6));
        assert_eq!(store.resolve("x", Protocol::Rpc), Ttl::Seconds(60));
    }
}
