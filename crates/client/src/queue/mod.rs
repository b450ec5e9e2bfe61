//! Bounded-concurrency image loader with priority ordering.
//!
//! Requests wait in a pending list sorted by descending priority (ties keep
//! arrival order). A fixed number of workers drain it; a worker that
//! finishes pulls the next item at once. Successful results go into an
//! insertion-ordered [`ResultCache`], so a repeated request for the same URL
//! resolves without touching the network.
//!
//! Concurrent requests for one URL share a single load.

pub mod loader;
pub mod lru;

pub use loader::{ImageLoader, ProxiedLoader};
pub use lru::ResultCache;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::fetch::FetchError;
use pagewire_core::AppConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("load timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Load(#[from] FetchError),

    /// Dropped from the pending list by `clear()`.
    #[error("request cleared before dispatch")]
    Cleared,
}

type Outcome = Result<Bytes, QueueError>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Loads in flight at once
    pub concurrency: usize,
    /// Result cache capacity
    pub capacity: usize,
    /// Per-load timeout
    pub timeout: Duration,
    /// Result cache entry lifetime
    pub result_ttl: Duration,
}

impl From<&AppConfig> for QueueConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.queue_concurrency,
            capacity: config.queue_capacity,
            timeout: config.queue_timeout(),
            result_ttl: config.queue_result_ttl(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

#[derive(Debug)]
struct PendingItem {
    url: String,
    priority: i32,
}

#[derive(Debug)]
struct State {
    pending: Vec<PendingItem>,
    active: usize,
    results: ResultCache,
    waiters: HashMap<String, Vec<oneshot::Sender<Outcome>>>,
}

impl State {
    /// Insert behind every item of equal or higher priority.
    fn insert_pending(&mut self, url: String, priority: i32) {
        let pos = self
            .pending
            .iter()
            .position(|item| item.priority < priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, PendingItem { url, priority });
    }

    fn raise_priority(&mut self, url: &str, priority: i32) {
        if let Some(pos) = self.pending.iter().position(|item| item.url == url)
            && self.pending[pos].priority < priority
        {
            let item = self.pending.remove(pos);
            self.insert_pending(item.url, priority);
        }
    }
}

struct Inner<L> {
    loader: L,
    config: QueueConfig,
    state: Mutex<State>,
}

impl<L: ImageLoader> Inner<L> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start workers until the concurrency bound or the pending list runs out.
    fn pump(self: &Arc<Self>) {
        let mut state = self.lock();
        while state.active < self.config.concurrency && !state.pending.is_empty() {
            let item = state.pending.remove(0);
            state.active += 1;
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run(item).await });
        }
    }

    async fn run(self: Arc<Self>, item: PendingItem) {
        let timeout = self.config.timeout;
        let outcome = match tokio::time::timeout(timeout, self.loader.load(&item.url)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(QueueError::Load(e)),
            Err(_) => Err(QueueError::Timeout(timeout)),
        };

        match &outcome {
            Ok(bytes) => tracing::trace!(url = %item.url, bytes = bytes.len(), "queue load done"),
            Err(e) => tracing::debug!(url = %item.url, error = %e, "queue load failed"),
        }

        let waiters = {
            let mut state = self.lock();
            state.active -= 1;
            if let Ok(bytes) = &outcome {
                state.results.insert(item.url.clone(), bytes.clone());
            }
            state.waiters.remove(&item.url).unwrap_or_default()
        };
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }

        self.pump();
    }
}

/// A queued request's eventual result.
#[derive(Debug)]
pub enum Ticket {
    Ready(Bytes),
    Waiting(oneshot::Receiver<Outcome>),
}

impl Ticket {
    pub async fn wait(self) -> Result<Bytes, QueueError> {
        match self {
            Ticket::Ready(bytes) => Ok(bytes),
            Ticket::Waiting(rx) => rx.await.unwrap_or(Err(QueueError::Cleared)),
        }
    }
}

/// Priority image queue. Cloning shares the same queue.
pub struct PriorityQueue<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for PriorityQueue<L> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L: ImageLoader> PriorityQueue<L> {
    pub fn new(loader: L, config: QueueConfig) -> Self {
        let state = State {
            pending: Vec::new(),
            active: 0,
            results: ResultCache::new(config.capacity, config.result_ttl),
            waiters: HashMap::new(),
        };
        Self { inner: Arc::new(Inner { loader, config, state: Mutex::new(state) }) }
    }

    /// Load `url`, resolving from the result cache when possible.
    pub async fn add(&self, url: &str, priority: i32) -> Result<Bytes, QueueError> {
        self.submit(url, priority).wait().await
    }

    /// Enqueue `url` without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, url: &str, priority: i32) -> Ticket {
        let rx = {
            let mut state = self.inner.lock();
            if let Some(bytes) = state.results.get(url) {
                return Ticket::Ready(bytes);
            }

            let (tx, rx) = oneshot::channel();
            match state.waiters.get_mut(url) {
                Some(list) => {
                    list.push(tx);
                    state.raise_priority(url, priority);
                }
                None => {
                    state.waiters.insert(url.to_string(), vec![tx]);
                    state.insert_pending(url.to_string(), priority);
                }
            }
            rx
        };

        self.inner.pump();
        Ticket::Waiting(rx)
    }

    /// Enqueue upcoming pages, nearest first.
    ///
    /// The first URL gets `base_priority`, each following one a step lower.
    /// Stops enqueueing once `cancel` fires; already-issued tickets stay valid.
    pub fn preload(&self, urls: &[String], base_priority: i32, cancel: &CancellationToken) -> Vec<Ticket> {
        let mut tickets = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(enqueued = i, total = urls.len(), "preload cancelled");
                break;
            }
            let priority = base_priority.saturating_sub(i32::try_from(i).unwrap_or(i32::MAX));
            tickets.push(self.submit(url, priority));
        }
        tickets
    }

    /// Drop pending requests and cached results.
    ///
    /// Loads already dispatched run to completion.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.lock();
            let pending = std::mem::take(&mut state.pending);
            state.results.clear();
            pending
                .into_iter()
                .filter_map(|item| state.waiters.remove(&item.url))
                .flatten()
                .collect::<Vec<_>>()
        };
        for tx in dropped {
            let _ = tx.send(Err(QueueError::Cleared));
        }
    }

    /// Cached result for `url`, if any.
    pub fn cached(&self, url: &str) -> Option<Bytes> {
        self.inner.lock().results.get(url)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    pub fn cached_len(&self) -> usize {
        self.inner.lock().results.len()
    }
}
