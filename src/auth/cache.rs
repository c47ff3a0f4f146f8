//! Per-tenant credential manager cache.
//!
//! Bounded LRU keyed by refresh token. The whole map sits under one async
//! mutex so two concurrent misses on the same key still build exactly one
//! manager.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::manager::CredentialManager;
use crate::config::Config;

/// Default number of tenants kept alive.
pub const DEFAULT_CAPACITY: usize = 100;

pub struct CredentialCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    config: Config,
}

struct CacheInner {
    managers: HashMap<String, Arc<CredentialManager>>,
    /// Recency order, least-recently-used first.
    order: VecDeque<String>,
}

impl CredentialCache {
    pub fn new(config: Config) -> Self {
        Self::with_capacity(config, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(config: Config, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                managers: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            config,
        }
    }

    /// Look up the manager for a refresh token, creating it on first use.
    /// A hit moves the key to most-recently-used; an insert past capacity
    /// evicts the least-recently-used tenant.
    pub async fn get_or_create(&self, refresh_token: &str) -> Arc<CredentialManager> {
        let mut inner = self.inner.lock().await;

        if let Some(manager) = inner.managers.get(refresh_token).cloned() {
            touch(&mut inner.order, refresh_token);
            return manager;
        }

        let manager = Arc::new(CredentialManager::for_refresh_token(
            refresh_token,
            &self.config,
        ));
        inner
            .managers
            .insert(refresh_token.to_string(), manager.clone());
        inner.order.push_back(refresh_token.to_string());

        if inner.managers.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.managers.remove(&evicted);
                debug!(tenants = inner.managers.len(), "Evicted least-recently-used tenant");
            }
        }
        manager
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.managers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn contains(&self, refresh_token: &str) -> bool {
        self.inner.lock().await.managers.contains_key(refresh_token)
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
        order.push_back(key.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
