//! Deterministic, time-bucketed cache keys.
//!
//! A key is `{prefix};{window};{path};{args}` where
//! `window = floor(unix_time / ttl)`. Every request for the same query that
//! arrives inside one ttl-wide, epoch-aligned window maps to the same key;
//! a request after the boundary gets a new key and goes upstream again.
//!
//! Prefixes and windows never contain `;`, and `;`/`%` in the path are
//! percent-escaped, so the first three separators are unambiguous and the
//! arguments can take the rest of the string verbatim.

use std::fmt;
use std::num::NonZeroU64;

use serde_json::Value;
use url::form_urlencoded;

/// Arguments reduced to a stable string form.
///
/// Semantically identical argument sets serialize identically regardless
/// of the order they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CanonicalArgs(String);

impl CanonicalArgs {
    /// No arguments.
    pub fn none() -> Self {
        Self::default()
    }

    /// Query-string pairs, sorted by key then value, form-encoded.
    pub fn from_query(pairs: &[(String, String)]) -> Self {
        let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
        sorted.sort();
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(sorted.into_iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        Self(encoded)
    }

    /// JSON value with object keys sorted at every depth, compact form.
    pub fn from_json(value: &Value) -> Self {
        let mut out = String::new();
        write_canonical_json(value, &mut out);
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical_json(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// The epoch-aligned window `unix_secs` falls into.
pub fn time_window(unix_secs: u64, ttl_secs: NonZeroU64) -> u64 {
    unix_secs / ttl_secs.get()
}

/// Opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for one query at time `unix_secs`.
    pub fn build(
        prefix: &str,
        path_or_method: &str,
        args: &CanonicalArgs,
        ttl_secs: NonZeroU64,
        unix_secs: u64,
    ) -> Self {
        let window = time_window(unix_secs, ttl_secs);
        let path = escape_component(path_or_method);
        Self(format!("{prefix};{window};{path};{}", args.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape_component(s: &str) -> String {
    s.replace('%', "%25").replace(';', "%3B")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ttl(s: u64) -> NonZeroU64 {
        NonZeroU64::new(s).unwrap()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_order_does_not_matter() {
        let a = CanonicalArgs::from_query(&pairs(&[("height", "5"), ("prove", "false")]));
        let b = CanonicalArgs::from_query(&pairs(&[("prove", "false"), ("height", "5")]));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "height=5&prove=false");
    }

    #[test]
    fn query_values_are_encoded() {
        let a = CanonicalArgs::from_query(&pairs(&[("q", "a;b&c=d")]));
        assert!(!a.as_str().contains(';'));
        assert_ne!(
            a,
            CanonicalArgs::from_query(&pairs(&[("q", "a"), ("c", "d")]))
        );
    }

    #[test]
    fn json_keys_sorted_at_every_depth() {
        let a = CanonicalArgs::from_json(&json!({"b": 1, "a": {"y": [1, {"d": 0, "c": 1}], "x": null}}));
        assert_eq!(a.as_str(), r#"{"a":{"x":null,"y":[1,{"c":1,"d":0}]},"b":1}"#);
    }

    #[test]
    fn json_array_order_is_kept() {
        let a = CanonicalArgs::from_json(&json!([1, 2]));
        let b = CanonicalArgs::from_json(&json!([2, 1]));
        assert_ne!(a, b);
    }

    #[test]
    fn window_is_epoch_aligned() {
        assert_eq!(time_window(0, ttl(30)), 0);
        assert_eq!(time_window(29, ttl(30)), 0);
        assert_eq!(time_window(30, ttl(30)), 1);
    }

    #[test]
    fn same_window_same_key() {
        let args = CanonicalArgs::none();
        let a = CacheKey::build("rpc", "abci_info", &args, ttl(30), 60);
        let b = CacheKey::build("rpc", "abci_info", &args, ttl(30), 89);
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_window_differs() {
        let args = CanonicalArgs::none();
        let a = CacheKey::build("rpc", "abci_info", &args, ttl(30), 89);
        let b = CacheKey::build("rpc", "abci_info", &args, ttl(30), 90);
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_separates_protocols() {
        let args = CanonicalArgs::none();
        let a = CacheKey::build("rpc", "status", &args, ttl(6), 100);
        let b = CacheKey::build("rest", "status", &args, ttl(6), 100);
        assert_ne!(a, b);
    }

    #[test]
    fn separator_in_path_cannot_collide() {
        // "a;b" + "" vs "a" + "b" would collide without escaping.
        let a = CacheKey::build("rest", "a;b", &CanonicalArgs::none(), ttl(6), 0);
        let b = CacheKey::build("rest", "a", &CanonicalArgs::from_json(&json!("b")), ttl(6), 0);
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "rest;0;a%3Bb;");
    }
}
