//! HTTP transports shared by client handles.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

use super::error::LLMError;

/// Connection pool bounds for an async transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Maximum requests in flight at once.
    pub max_connections: usize,
    /// Maximum idle connections kept for reuse.
    pub max_keepalive_connections: usize,
}

impl PoolLimits {
    pub const DEFAULT: PoolLimits = PoolLimits {
        max_connections: 1000,
        max_keepalive_connections: 100,
    };
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Async HTTP transport: a `reqwest::Client` plus an optional bound on in-flight requests.
///
/// Cloning shares the underlying pool and limiter.
#[derive(Debug, Clone)]
pub struct AsyncTransport {
    client: reqwest::Client,
    limiter: Option<Arc<Semaphore>>,
    limits: Option<PoolLimits>,
}

impl AsyncTransport {
    /// Wrap a caller-built client as is, without a connection bound.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            limiter: None,
            limits: None,
        }
    }

    /// Build a transport whose pool enforces `limits`.
    pub fn pooled(limits: PoolLimits) -> Result<Self, LLMError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(limits.max_keepalive_connections)
            .build()?;
        debug!(
            max_connections = limits.max_connections,
            max_keepalive_connections = limits.max_keepalive_connections,
            "Built pooled HTTP transport"
        );
        Ok(Self {
            client,
            limiter: Some(Arc::new(Semaphore::new(limits.max_connections))),
            limits: Some(limits),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Pool bounds, if this transport enforces any.
    pub fn limits(&self) -> Option<PoolLimits> {
        self.limits
    }

    /// Connection slots currently free, if bounded.
    pub fn available_connections(&self) -> Option<usize> {
        self.limiter.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a connection slot. The slot is released when the permit drops.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.limiter {
            // The semaphore is never closed, so acquisition only fails if that changes.
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        }
    }
}

/// Verify an HTTP client can be built before any provider is used.
pub fn check_http_backend() -> Result<(), LLMError> {
    match reqwest::Client::builder().build() {
        Ok(_) => Ok(()),
        Err(e) => {
            error!(error = %e, "HTTP backend unavailable");
            Err(LLMError::BackendUnavailable(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = PoolLimits::default();
        assert_eq!(limits.max_connections, 1000);
        assert_eq!(limits.max_keepalive_connections, 100);
    }

    #[tokio::test]
    async fn test_pooled_transport_bounds_connections() {
        let transport = AsyncTransport::pooled(PoolLimits {
            max_connections: 2,
            max_keepalive_connections: 1,
        })
        .unwrap();
        assert_eq!(transport.available_connections(), Some(2));

        let first = transport.acquire().await;
        let second = transport.clone().acquire().await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(transport.available_connections(), Some(0));

        drop(first);
        assert_eq!(transport.available_connections(), Some(1));
    }

    #[tokio::test]
    async fn test_caller_client_is_unbounded() {
        let transport = AsyncTransport::from_client(reqwest::Client::new());
        assert!(transport.limits().is_none());
        assert!(transport.available_connections().is_none());
        assert!(transport.acquire().await.is_none());
    }

    #[test]
    fn test_backend_check_passes() {
        assert!(check_http_backend().is_ok());
    }
}
