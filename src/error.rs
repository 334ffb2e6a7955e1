//! Gateway error types

use crate::policy::Protocol;

/// Errors surfaced by the caching gateway.
///
/// A non-2xx answer from a reachable upstream is not an error: it comes back
/// as a [`GatewayResponse`](crate::gateway::GatewayResponse) carrying the
/// upstream status and body unchanged.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The resolved policy marks this endpoint as disabled.
    #[error("the {protocol} path '{path}' is disabled on this node")]
    EndpointDisabled { protocol: Protocol, path: String },

    /// Neither the primary nor the backup could be reached.
    #[error("upstream unreachable (primary: {primary}; backup: {backup})")]
    UpstreamTransport { primary: String, backup: String },

    /// A single transport-level failure against one upstream target.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("cache store error: {0}")]
    CacheStore(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether this error came from the transport layer (connect, DNS,
    /// timeout) rather than from an answer the upstream actually sent.
    ///
    /// Only transport errors trigger failover to the backup target.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::UpstreamTransport { .. })
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_message_names_path() {
        let err = GatewayError::EndpointDisabled {
            protocol: Protocol::Rpc,
            path: "genesis".into(),
        };
        assert_eq!(
            err.to_string(),
            "the rpc path 'genesis' is disabled on this node"
        );
    }

    #[test]
    fn transport_classification() {
        assert!(GatewayError::Http("connection refused".into()).is_transport());
        assert!(
            GatewayError::UpstreamTransport {
                primary: "a".into(),
                backup: "b".into()
            }
            .is_transport()
        );
        assert!(!GatewayError::CacheStore("down".into()).is_transport());
        assert!(!GatewayError::InvalidInput("bad".into()).is_transport());
    }
}
