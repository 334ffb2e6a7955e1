//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus, statsd);
//! without a recorder installed, all metric calls are no-ops. These run
//! alongside the persisted [`CallCounter`](crate::counter::CallCounter),
//! which only tracks cache hits and outbound calls.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `endpoint_cache_`. Counters end in
//! `_total`, histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `protocol`: "rpc" or "rest"
//! - `target`: upstream target: "primary" or "backup"
//! - `status`: outcome: "ok" or "error"

/// Queries answered from the cache store.
///
/// Labels: `protocol`.
pub const CACHE_HITS_TOTAL: &str = "endpoint_cache_hits_total";

/// Queries that missed the cache store and went upstream.
///
/// Labels: `protocol`.
pub const CACHE_MISSES_TOTAL: &str = "endpoint_cache_misses_total";

/// Upstream requests issued, per target.
///
/// Labels: `protocol`, `target`, `status`.
pub const UPSTREAM_REQUESTS_TOTAL: &str = "endpoint_cache_upstream_requests_total";

/// Upstream request duration in seconds.
///
/// Labels: `protocol`, `target`.
pub const UPSTREAM_DURATION_SECONDS: &str = "endpoint_cache_upstream_duration_seconds";

/// Requests retried against the backup after a primary transport failure.
///
/// Labels: `protocol`.
pub const FAILOVERS_TOTAL: &str = "endpoint_cache_failovers_total";

/// Requests rejected because their policy is disabled.
///
/// Labels: `protocol`.
pub const DISABLED_TOTAL: &str = "endpoint_cache_disabled_total";
