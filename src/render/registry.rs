//! Registry of render pools.
//!
//! The registry provides:
//! - lazy pool creation per [`PoolKey`]
//! - single-flight creation, so concurrent first requests build one pool
//! - an LRU bound on distinct pools; evicted pools are retired, which
//!   destroys their instances as requests already using them finish
//!
//! A pool whose style the engine rejects is never registered, so a later
//! request with a corrected style is not blocked.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::pool::{PoolKey, PoolSettings, RenderPool};
use super::renderer::{AssetSource, RendererFactory};
use crate::error::PoolError;
use crate::singleflight::SingleFlight;

pub struct RenderPoolRegistry {
    factory: Arc<dyn RendererFactory>,
    assets: Arc<dyn AssetSource>,
    settings: PoolSettings,
    pools: Mutex<LruCache<PoolKey, Arc<RenderPool>>>,
    creating: SingleFlight<PoolKey, Result<Arc<RenderPool>, PoolError>>,
}

impl RenderPoolRegistry {
    pub fn new(
        factory: Arc<dyn RendererFactory>,
        assets: Arc<dyn AssetSource>,
        settings: PoolSettings,
        max_pools: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_pools).unwrap_or(NonZeroUsize::MIN);
        Self {
            factory,
            assets,
            settings,
            pools: Mutex::new(LruCache::new(capacity)),
            creating: SingleFlight::new(),
        }
    }

    /// Get the pool for `key`, creating it with `style` on first use.
    pub async fn get_pool(
        &self,
        key: &PoolKey,
        style: &Arc<Value>,
    ) -> Result<Arc<RenderPool>, PoolError> {
        if let Some(pool) = self.pools.lock().await.get(key) {
            return Ok(pool.clone());
        }

        self.creating
            .run(key.clone(), || async move {
                if let Some(pool) = self.pools.lock().await.get(key) {
                    return Ok(pool.clone());
                }

                let pool = Arc::new(
                    RenderPool::create(
                        key.clone(),
                        style.clone(),
                        self.factory.clone(),
                        self.assets.clone(),
                        self.settings,
                    )
                    .await?,
                );

                let evicted = self.pools.lock().await.push(key.clone(), pool.clone());
                if let Some((old_key, old_pool)) = evicted {
                    if &old_key != key {
                        old_pool.retire();
                        info!(pool = %old_key, "Evicted render pool");
                    }
                }

                debug!(pool = %key, "Registered render pool");
                Ok(pool)
            })
            .await
    }

    /// Number of registered pools.
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Whether a pool for `key` is registered; does not touch LRU order.
    pub async fn contains(&self, key: &PoolKey) -> bool {
        self.pools.lock().await.contains(key)
    }

    /// Close and forget every pool.
    pub async fn shutdown(&self) {
        let mut pools = self.pools.lock().await;
        let count = pools.len();
        while let Some((_, pool)) = pools.pop_lru() {
            pool.close();
        }
        info!(pools = count, "Render pools shut down");
    }
}
