//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::core::config::ServerConfig;

use super::upstream::{AggregatorUpstream, Upstream, UpstreamError};

/// Shared application state.
pub struct AppState {
    /// Aggregator used to generate completions.
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    /// Create state around an existing upstream.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { upstream }
    }

    /// Create state backed by the configured aggregator.
    ///
    /// A missing API key is not fatal here; requests fail with 401 until one
    /// is configured.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ServerConfig) -> Result<Arc<Self>, UpstreamError> {
        if config.api_key.is_none() {
            tracing::warn!("no upstream API key configured; chat requests will be rejected");
        }
        let upstream = AggregatorUpstream::new(config)?;
        Ok(Arc::new(Self::new(Arc::new(upstream))))
    }
}
