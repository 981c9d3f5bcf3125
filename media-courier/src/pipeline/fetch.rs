//! Proxy-failover around extractor calls.
//!
//! Routes are tried in order. Only access-restriction failures move on to the
//! next route; anything else is assumed to fail the same way on every route
//! and is surfaced at once.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{ProxyList, Route};
use crate::extractor::{Download, DownloadRequest, ExtractError, Extractor};
use crate::pipeline::progress::ProgressSink;

/// Failure phrases that indicate a geographic, age, privacy or availability
/// block. Matched case-insensitively as substrings.
pub const RESTRICTION_SIGNATURES: &[&str] = &[
    "video unavailable",
    "is not available in your country",
    "not made this video available in your country",
    "available in your country",
    "geo",
    "blocked",
    "not available",
    "sign in to confirm your age",
    "this video is not available",
    "private video",
    "removed by the uploader",
    "uploader has not made this video available",
    "country",
];

/// Whether an extractor failure looks like an access restriction.
pub fn is_restricted(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RESTRICTION_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
}

/// Outcome of a failed failover sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Cancelled")]
    Cancelled,

    /// Non-restriction failure.
    #[error("{0}")]
    Failed(String),

    /// Restriction on the only, direct route.
    #[error("Geo-restricted video. Please configure PROXY or PROXY_LIST in .env")]
    ProxyRequired(String),

    #[error("All {routes} proxies failed. Last error: {last}")]
    AllRoutesExhausted { routes: usize, last: String },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Ordered route failover.
#[derive(Debug, Clone)]
pub struct ProxyFailover {
    routes: ProxyList,
}

impl ProxyFailover {
    pub fn new(routes: ProxyList) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &ProxyList {
        &self.routes
    }

    /// Run `attempt` once per route until it succeeds or fails terminally.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, FetchError>
    where
        F: FnMut(Route) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let total = self.routes.len();
        let mut last_error = String::new();

        for (index, route) in self.routes.routes().iter().enumerate() {
            info!(
                operation,
                route = %route,
                "Attempting with route [{}/{}]",
                index + 1,
                total
            );

            match attempt(route.clone()).await {
                Ok(value) => return Ok(value),
                Err(ExtractError::Cancelled) => return Err(FetchError::Cancelled),
                Err(ExtractError::Failed(message)) => {
                    warn!(operation, route = %route, error = %message, "Route failed");
                    if !is_restricted(&message) {
                        return Err(FetchError::Failed(message));
                    }
                    info!(operation, "Access restriction detected, trying next route");
                    last_error = message;
                }
            }
        }

        if self.routes.is_direct_only() {
            Err(FetchError::ProxyRequired(last_error))
        } else {
            Err(FetchError::AllRoutesExhausted {
                routes: total,
                last: last_error,
            })
        }
    }

    /// Download one item with failover.
    pub async fn download(
        &self,
        extractor: &Arc<dyn Extractor>,
        request: &DownloadRequest,
        progress: &ProgressSink,
    ) -> Result<Download, FetchError> {
        self.run("download", |route| {
            let extractor = Arc::clone(extractor);
            let progress = progress.clone();
            async move { extractor.download(request, &route, progress).await }
        })
        .await
    }
}
