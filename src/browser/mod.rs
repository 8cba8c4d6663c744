//! Bounded headless-browser pool with expiry and a FIFO waiter queue.
//!
//! The concrete browser automation backend (e.g. a chromiumoxide session)
//! is out of scope; [`BrowserLauncher`] is the capability surface the pool
//! depends on, with [`fake::FakeBrowserLauncher`] backing the test suite.
//! Mirrors the instance-list-behind-a-read/write-lock-plus-independent-
//! waiter-queue design called out for this component: the instance list is
//! protected by a `tokio::sync::RwLock`, and the waiter queue is a
//! separately synchronized bounded `VecDeque` of single-slot oneshot
//! channels, so a waiter being served never needs to re-acquire the
//! instance-list lock.

pub mod fake;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Maximum number of queued `get` callers waiting for a freed instance.
const WAITER_QUEUE_CAPACITY: usize = 100;

/// How often the background sweeper checks for aged-out idle instances.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("browser pool is closed")]
    Closed,
    #[error("browser pool is full")]
    Full,
    #[error("timed out waiting for a browser instance")]
    Timeout,
    #[error("failed to launch browser: {0}")]
    LaunchFailed(#[from] anyhow::Error),
}

/// A live headless-browser session. The pool never inspects this beyond
/// its id and lifecycle; navigation is the collector's concern.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>>;
    async fn close(&self);
}

/// A single page within a browser session, scoped to one navigation.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn set_viewport(&self, width: u32, height: u32, user_agent: &str) -> anyhow::Result<()>;
    async fn navigate(&self, url: &str) -> anyhow::Result<()>;
    async fn wait_for_load(&self) -> anyhow::Result<()>;
    /// HTTP status of the document response for the navigated URL, if one
    /// was observed before load completion.
    async fn document_response_status(&self) -> Option<u16>;
    async fn content(&self) -> anyhow::Result<String>;
    async fn screenshot_jpeg(&self, quality: u8) -> anyhow::Result<Vec<u8>>;
    async fn close(&self);
}

/// Launches a new [`BrowserHandle`], connecting with cert-error checking
/// disabled and headless/no-sandbox launch flags applied.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Arc<dyn BrowserHandle>>;
}

struct Slot {
    handle: Arc<dyn BrowserHandle>,
    created_at: Instant,
    in_use: bool,
}

impl Slot {
    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A reserved browser instance handed out by [`BrowserPool::get`]. Must be
/// returned via [`BrowserPool::put`] when the caller is done with it.
pub struct BrowserLease {
    pub id: String,
    pub handle: Arc<dyn BrowserHandle>,
}

struct PoolState {
    slots: Vec<Slot>,
    closed: bool,
}

pub struct BrowserPool {
    launcher: Arc<dyn BrowserLauncher>,
    max_size: usize,
    max_age: Duration,
    state: RwLock<PoolState>,
    waiters: Mutex<VecDeque<oneshot::Sender<BrowserLease>>>,
}

impl BrowserPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, max_size: usize, max_age: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            launcher,
            max_size,
            max_age,
            state: RwLock::new(PoolState { slots: Vec::new(), closed: false }),
            waiters: Mutex::new(VecDeque::new()),
        });
        pool.clone().spawn_sweeper();
        pool
    }

    fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                self.sweep_expired().await;
            }
        });
    }

    async fn sweep_expired(&self) {
        let mut expired = Vec::new();
        {
            let mut state = self.state.write().await;
            if state.closed {
                return;
            }
            let max_age = self.max_age;
            state.slots.retain(|slot| {
                if !slot.in_use && slot.age() >= max_age {
                    expired.push(slot.handle.clone());
                    false
                } else {
                    true
                }
            });
        }
        for handle in expired {
            debug!(id = handle.id(), "browser pool: sweeping expired idle instance");
            handle.close().await;
        }
    }

    /// Reserves a browser instance, launching a new one if the pool has
    /// room or waiting in FIFO order if it's at capacity. `ctx` cancels a
    /// queued wait with [`PoolError::Timeout`].
    pub async fn get(&self, ctx: &CancellationToken) -> Result<BrowserLease, PoolError> {
        {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(slot) = state.slots.iter_mut().find(|s| !s.in_use && s.age() < self.max_age) {
                slot.in_use = true;
                return Ok(BrowserLease { id: slot.handle.id().to_string(), handle: slot.handle.clone() });
            }

            if state.slots.len() < self.max_size {
                drop(state);
                let handle = self.launcher.launch().await?;
                let lease = BrowserLease { id: handle.id().to_string(), handle: handle.clone() };
                let mut state = self.state.write().await;
                if state.closed {
                    drop(state);
                    handle.close().await;
                    return Err(PoolError::Closed);
                }
                state.slots.push(Slot { handle, created_at: Instant::now(), in_use: true });
                return Ok(lease);
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            if waiters.len() >= WAITER_QUEUE_CAPACITY {
                return Err(PoolError::Full);
            }
            waiters.push_back(tx);
        }

        tokio::select! {
            lease = rx => lease.map_err(|_| PoolError::Closed),
            _ = ctx.cancelled() => Err(PoolError::Timeout),
        }
    }

    /// Releases a leased instance back to the pool. Destroys it instead if
    /// it has aged out; otherwise hands it directly to the next waiter or
    /// marks it idle.
    pub async fn put(&self, lease: BrowserLease) {
        let waiter = {
            let mut state = self.state.write().await;
            let Some(slot) = state.slots.iter_mut().find(|s| s.handle.id() == lease.id) else {
                return;
            };

            if state.closed || slot.age() >= self.max_age {
                let handle = slot.handle.clone();
                state.slots.retain(|s| s.handle.id() != lease.id);
                drop(state);
                debug!(id = lease.id, "browser pool: destroying aged-out or post-close instance on release");
                handle.close().await;
                return;
            }

            let mut waiters = self.waiters.lock().await;
            match waiters.pop_front() {
                Some(tx) => {
                    slot.in_use = true;
                    Some((tx, lease))
                }
                None => {
                    slot.in_use = false;
                    None
                }
            }
        };

        if let Some((tx, lease)) = waiter {
            let id = lease.id.clone();
            if tx.send(lease).is_err() {
                warn!(id, "browser pool: waiter dropped before instance could be handed off, marking idle instead");
                let mut state = self.state.write().await;
                if let Some(slot) = state.slots.iter_mut().find(|s| s.handle.id() == id) {
                    slot.in_use = false;
                }
            }
        }
    }

    /// Marks the pool closed, drains the waiter queue, and destroys every
    /// instance. Destruction errors are logged, never propagated.
    pub async fn close(&self) {
        let (handles, waiters) = {
            let mut state = self.state.write().await;
            state.closed = true;
            let handles: Vec<_> = state.slots.drain(..).map(|s| s.handle).collect();
            let mut waiters = self.waiters.lock().await;
            let drained: Vec<_> = waiters.drain(..).collect();
            (handles, drained)
        };

        drop(waiters);

        for handle in handles {
            handle.close().await;
        }
    }

    #[cfg(test)]
    pub async fn in_use_count(&self) -> usize {
        self.state.read().await.slots.iter().filter(|s| s.in_use).count()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeBrowserLauncher;
    use super::*;
    use std::time::Duration;

    fn pool(max_size: usize, max_age: Duration) -> Arc<BrowserPool> {
        BrowserPool::new(Arc::new(FakeBrowserLauncher::new()), max_size, max_age)
    }

    #[tokio::test]
    async fn get_launches_up_to_max_size_then_queues() {
        let pool = pool(2, Duration::from_secs(3600));
        let ctx = CancellationToken::new();

        let a = pool.get(&ctx).await.expect("first get");
        let b = pool.get(&ctx).await.expect("second get");
        assert_eq!(pool.in_use_count().await, 2);

        let short_ctx = CancellationToken::new();
        let short_ctx_clone = short_ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            short_ctx_clone.cancel();
        });
        let third = pool.get(&short_ctx).await;
        assert!(matches!(third, Err(PoolError::Timeout)));

        pool.put(a).await;
        pool.put(b).await;
    }

    #[tokio::test]
    async fn a_released_instance_is_handed_directly_to_a_waiter() {
        let pool = pool(1, Duration::from_secs(3600));
        let ctx = CancellationToken::new();

        let lease = pool.get(&ctx).await.expect("first get");

        let waiter_pool = pool.clone();
        let waiter_ctx = CancellationToken::new();
        let waiter = tokio::spawn(async move { waiter_pool.get(&waiter_ctx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.put(lease).await;

        let handed = waiter.await.expect("join").expect("waiter should receive the released instance");
        assert_eq!(pool.in_use_count().await, 1);
        pool.put(handed).await;
    }

    #[tokio::test]
    async fn put_destroys_an_aged_out_instance_instead_of_recycling_it() {
        let pool = pool(1, Duration::from_millis(10));
        let ctx = CancellationToken::new();

        let lease = pool.get(&ctx).await.expect("get");
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.put(lease).await;

        assert_eq!(pool.state.read().await.slots.len(), 0);
    }

    #[tokio::test]
    async fn close_drains_and_destroys_every_instance() {
        let pool = pool(2, Duration::from_secs(3600));
        let ctx = CancellationToken::new();
        let _a = pool.get(&ctx).await.expect("get");

        pool.close().await;
        assert_eq!(pool.state.read().await.slots.len(), 0);

        let after_close = pool.get(&ctx).await;
        assert!(matches!(after_close, Err(PoolError::Closed)));
    }
}
