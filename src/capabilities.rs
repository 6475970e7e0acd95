//! Capability resolution with a short-lived per-model cache.
//!
//! Capability checks only gate optional request fields, so every failure
//! degrades to "no special capability" instead of failing the turn. Failed
//! lookups are not cached; a model swapped on the server is picked up once the
//! TTL lapses. Each lookup is bounded, so a backend that accepts the
//! connection and never answers counts as a failure.

use crate::backend::{CapabilitySet, ChatBackend};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CapabilityResolver {
    backend: Arc<dyn ChatBackend>,
    ttl: Duration,
    lookup_timeout: Duration,
    cache: DashMap<String, (Instant, CapabilitySet)>,
}

impl CapabilityResolver {
    pub fn new(backend: Arc<dyn ChatBackend>, ttl: Duration) -> Self {
        CapabilityResolver {
            backend,
            ttl,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            cache: DashMap::new(),
        }
    }

    /// Upper bound for a single capability or model-listing query
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    /// Capabilities of `model`, empty if the backend cannot be asked
    pub async fn resolve(&self, model: &str) -> CapabilitySet {
        if let Some(entry) = self.cache.get(model) {
            let (fetched_at, caps) = *entry;
            if fetched_at.elapsed() < self.ttl {
                return caps;
            }
        }

        let fetched = timeout(self.lookup_timeout, self.backend.fetch_capabilities(model))
            .await
            .unwrap_or_else(|elapsed| Err(elapsed.into()));

        match fetched {
            Ok(caps) => {
                debug!("Resolved capabilities for {model}: {caps:?}");
                self.cache.insert(model.to_string(), (Instant::now(), caps));
                caps
            }
            Err(e) => {
                warn!(
                    "Capability lookup for {model} on {} failed, assuming none: {e}",
                    self.backend.descriptor().name
                );
                CapabilitySet::empty()
            }
        }
    }

    /// Models the backend currently offers, empty if it cannot be asked
    pub async fn available_models(&self) -> Vec<String> {
        let fetched = timeout(self.lookup_timeout, self.backend.fetch_models())
            .await
            .unwrap_or_else(|elapsed| Err(elapsed.into()));

        match fetched {
            Ok(models) => models,
            Err(e) => {
                warn!(
                    "Model listing on {} failed: {e}",
                    self.backend.descriptor().name
                );
                Vec::new()
            }
        }
    }

    /// Drops the cached entry for a model
    pub fn invalidate(&self, model: &str) {
        self.cache.remove(model);
    }
}
