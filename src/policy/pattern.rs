//! Endpoint pattern language.
//!
//! A pattern is literal text with `*` wildcards, where each `*` stands for
//! one or more characters. Patterns always match the whole path: `status`
//! matches `status` but not `status_extra` or `net_status`.
//!
//! Documents written for regex-style matching often wrap entries as
//! `^abci_info$`; a leading `^` and trailing `$` are accepted and dropped,
//! since every pattern is anchored anyway. A leading `/` is dropped too, so
//! `/genesis` and `genesis` are the same pattern.

use regex::Regex;

use crate::{GatewayError, Result};

/// A compiled, anchored endpoint pattern.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    source: String,
    matcher: Regex,
}

impl EndpointPattern {
    /// Compile a pattern.
    ///
    /// Returns a `Configuration` error for an empty pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        let body = pattern.strip_prefix('^').unwrap_or(pattern);
        let body = body.strip_suffix('$').unwrap_or(body);
        let body = body.strip_prefix('/').unwrap_or(body);

        if body.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "empty endpoint pattern '{pattern}'"
            )));
        }

        let mut expr = String::from("(?s)^");
        for (i, literal) in body.split('*').enumerate() {
            if i > 0 {
                expr.push_str(".+");
            }
            expr.push_str(&regex::escape(literal));
        }
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|e| {
            GatewayError::Configuration(format!("invalid endpoint pattern '{pattern}': {e}"))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Whether `path` (with or without its leading `/`) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.matcher.is_match(path)
    }

    /// The pattern as written in the policy document.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
