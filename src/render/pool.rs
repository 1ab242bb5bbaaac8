//! Fixed-capacity pool of renderer instances for one style.
//!
//! A semaphore bounds the number of instances checked out at once; idle
//! instances wait on a free list. Acquiring takes a permit (waiting up to
//! the acquire timeout), then reuses an idle instance or builds a new one.
//! Permits and instances go back when the [`PooledRenderer`] guard drops,
//! on success, error or cancellation alike.
//!
//! ```text
//! acquire ─► permit (timeout ─► Exhausted) ─► idle.pop() or factory.create()
//!                                                      │
//! drop(PooledRenderer) ◄── render on blocking pool ◄───┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::fingerprint::StyleFingerprint;
use super::renderer::{
    AssetSource, RenderMode, RenderParams, Renderer, RendererFactory, RendererOptions,
};
use crate::config::PoolConfig;
use crate::error::{PoolError, RenderError};

/// Identifies one pool: instances are bound to a style, a mode and a
/// pixel ratio, and cannot be shared across them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub fingerprint: StyleFingerprint,
    pub mode: RenderMode,
    pub pixel_ratio: u32,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}x",
            self.fingerprint,
            self.mode.as_str(),
            self.pixel_ratio
        )
    }
}

/// Pool bounds and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_instances: usize,
    pub acquire_timeout: Duration,
    pub render_timeout: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_instances: config.pool_max_instances.max(1),
            acquire_timeout: Duration::from_millis(config.pool_acquire_timeout_ms),
            render_timeout: Duration::from_millis(config.render_timeout_ms),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Renderer instances for one [`PoolKey`].
pub struct RenderPool {
    key: PoolKey,
    style: Arc<Value>,
    factory: Arc<dyn RendererFactory>,
    assets: Arc<dyn AssetSource>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Renderer>>>,
    live: AtomicUsize,
    retired: AtomicBool,
}

impl RenderPool {
    /// Create a pool and its first instance.
    ///
    /// Building one instance up front makes a style the engine rejects fail
    /// here, before the pool is registered anywhere.
    pub async fn create(
        key: PoolKey,
        style: Arc<Value>,
        factory: Arc<dyn RendererFactory>,
        assets: Arc<dyn AssetSource>,
        settings: PoolSettings,
    ) -> Result<Self, PoolError> {
        let pool = Self {
            permits: Arc::new(Semaphore::new(settings.max_instances.max(1))),
            idle: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            key,
            style,
            factory,
            assets,
            settings,
        };

        let first = pool.new_instance().await?;
        pool.lock_idle().push(first);
        debug!(pool = %pool.key, "Created render pool");
        Ok(pool)
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Check out an instance, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> Result<PooledRenderer<'_>, PoolError> {
        let permit = tokio::time::timeout(
            self.settings.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::Exhausted {
            waited_ms: self.settings.acquire_timeout.as_millis() as u64,
        })?
        .map_err(|_| PoolError::Closed)?;

        let idle = self.lock_idle().pop();
        let renderer = match idle {
            Some(renderer) => renderer,
            None => self.new_instance().await?,
        };

        Ok(PooledRenderer {
            pool: self,
            renderer: Some(renderer),
            _permit: permit,
        })
    }

    /// Acquire an instance, render, and release it.
    pub async fn render(&self, params: RenderParams) -> Result<Vec<u8>, RenderError> {
        let mut lease = self.acquire().await?;
        lease.render(params).await
    }

    /// Stop handing out instances and destroy the idle ones.
    ///
    /// Checked-out instances are destroyed when returned.
    pub fn close(&self) {
        self.permits.close();
        let drained: Vec<_> = self.lock_idle().drain(..).collect();
        self.live.fetch_sub(drained.len(), Ordering::SeqCst);
        debug!(pool = %self.key, destroyed = drained.len(), "Closed render pool");
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Destroy the idle instances and stop keeping returned ones.
    ///
    /// Unlike [`close`](Self::close), callers already waiting for a permit
    /// and holders of the pool keep working; each instance is destroyed as
    /// it comes back.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.lock_idle().drain(..).collect();
        self.live.fetch_sub(drained.len(), Ordering::SeqCst);
        debug!(pool = %self.key, destroyed = drained.len(), "Retired render pool");
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Instances currently alive, idle or checked out.
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn idle_instances(&self) -> usize {
        self.lock_idle().len()
    }

    async fn new_instance(&self) -> Result<Box<dyn Renderer>, PoolError> {
        let factory = self.factory.clone();
        let style = self.style.clone();
        let assets = self.assets.clone();
        let options = RendererOptions {
            mode: self.key.mode,
            pixel_ratio: self.key.pixel_ratio,
        };

        let renderer = tokio::task::spawn_blocking(move || factory.create(&style, options, assets))
            .await
            .map_err(|e| PoolError::StyleLoad(format!("renderer construction panicked: {e}")))?
            .map_err(|e| PoolError::StyleLoad(e.0))?;

        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(pool = %self.key, live = self.live_instances(), "Created renderer instance");
        Ok(renderer)
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Box<dyn Renderer>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, renderer: Box<dyn Renderer>) {
        if self.is_closed() || self.is_retired() {
            self.discard(renderer);
        } else {
            self.lock_idle().push(renderer);
        }
    }

    fn discard(&self, renderer: Box<dyn Renderer>) {
        drop(renderer);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A checked-out instance; returned to its pool on drop.
pub struct PooledRenderer<'a> {
    pool: &'a RenderPool,
    renderer: Option<Box<dyn Renderer>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledRenderer<'_> {
    /// Render on the blocking pool, bounded by the render timeout.
    ///
    /// On timeout or panic the instance is abandoned rather than returned:
    /// its state is unknown. The permit is freed either way.
    pub async fn render(&mut self, params: RenderParams) -> Result<Vec<u8>, RenderError> {
        let mut renderer = self
            .renderer
            .take()
            .ok_or_else(|| RenderError::Renderer("renderer instance was lost".to_string()))?;

        let task = tokio::task::spawn_blocking(move || {
            let result = renderer.render(&params);
            (renderer, result)
        });

        let timeout = self.pool.settings.render_timeout;
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok((renderer, result))) => {
                self.renderer = Some(renderer);
                result.map_err(|e| RenderError::Renderer(e.0))
            }
            Ok(Err(join)) => {
                self.pool.live.fetch_sub(1, Ordering::SeqCst);
                warn!(pool = %self.pool.key, error = %join, "Renderer panicked; instance dropped");
                Err(RenderError::Renderer(format!("renderer panicked: {join}")))
            }
            Err(_) => {
                // The blocking task keeps the instance and drops it when the
                // engine eventually returns.
                self.pool.live.fetch_sub(1, Ordering::SeqCst);
                warn!(pool = %self.pool.key, timeout_ms = timeout.as_millis() as u64, "Render timed out; instance abandoned");
                Err(RenderError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for PooledRenderer<'_> {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            self.pool.release(renderer);
        }
    }
}
