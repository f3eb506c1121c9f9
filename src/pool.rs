//! Connection Pool (C4): a bounded pool of Interactive Sessions with
//! acquire/release, liveness, idle reaping, and per-handle admin-mode
//! persistence.
//!
//! The teacher's pool is a `moka::future::Cache` keyed by address with
//! TTL eviction and no acquire-blocking; it cannot express bounded
//! capacity, FIFO fairness, or an explicit `Discard`. This pool is
//! hand-rolled over `tokio::sync::Mutex` + `tokio::sync::Notify` instead
//! — the async analogue of a condition variable, used the same way the
//! wider example pack reaches for `Notify` for producer/consumer
//! handoff.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::prompt::PromptKind;

/// Result of one `send`: the accumulated body bytes (final prompt line
/// excluded) plus which prompt kind ended the read, so callers like the
/// Executor's admin-escalation dialog can branch on the prompt itself
/// instead of scanning already-stripped body bytes for a `#`.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub bytes: Vec<u8>,
    pub prompt_kind: PromptKind,
}

/// Abstraction over an Interactive Session's surface the Pool and
/// Executor need. Lets tests exercise pool/executor concurrency
/// properties against a fake session with no real SSH, mirroring the
/// teacher's fixture-replay testing philosophy.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    async fn send(&self, cmd: &str, deadline: Duration) -> Result<SendOutcome, ClientError>;
    async fn read_until_prompt(&self, deadline: Duration) -> Result<(), ClientError>;
    async fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Creates new sessions on demand. The Pool calls this outside its own
/// mutex, per the Acquire algorithm's step 3.
#[async_trait]
pub trait SessionFactory<S: SessionTransport>: Send + Sync {
    async fn create(&self) -> Result<S, ClientError>;
}

struct Entry<S> {
    session: Arc<S>,
    admin_mode: AtomicBool,
    use_count: AtomicU64,
    last_used: std::sync::Mutex<Instant>,
    id: u64,
}

impl<S> Entry<S> {
    fn touch(&self) {
        self.use_count.fetch_add(1, Ordering::SeqCst);
        *self.last_used.lock().unwrap() = Instant::now();
    }
}

/// An identity-equality reference to a pooled session, carrying its pool
/// identifier and admin-mode bit. Never shared between callers
/// concurrently; the Pool enforces single-owner semantics by only ever
/// handing one handle per `Entry` to one caller at a time.
pub struct PoolHandle<S> {
    entry: Arc<Entry<S>>,
}

impl<S> Clone for PoolHandle<S> {
    fn clone(&self) -> Self {
        Self { entry: self.entry.clone() }
    }
}

impl<S: SessionTransport> PoolHandle<S> {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn session(&self) -> &S {
        &self.entry.session
    }

    pub fn is_admin_mode(&self) -> bool {
        self.entry.admin_mode.load(Ordering::SeqCst)
    }

    pub fn set_admin_mode(&self, value: bool) {
        self.entry.admin_mode.store(value, Ordering::SeqCst);
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_acquisitions: u64,
    pub wait_count: u64,
    pub available: usize,
    pub in_use: usize,
}

struct PoolInner<S> {
    available: VecDeque<Arc<Entry<S>>>,
    in_use: std::collections::HashSet<u64>,
    by_id: std::collections::HashMap<u64, Arc<Entry<S>>>,
    closed: bool,
    total_created: u64,
    total_acquisitions: u64,
    wait_count: u64,
    next_id: u64,
    /// Sessions reserved for creation but not yet registered in `in_use`:
    /// counted against `max_sessions` the moment a caller takes the
    /// `MustCreate` branch, before the lock is released for the factory
    /// call, so two concurrent acquires can't both see spare capacity and
    /// both create a session.
    creating: usize,
}

/// Bounded pool of Interactive Sessions.
pub struct Pool<S: SessionTransport> {
    inner: Mutex<PoolInner<S>>,
    notify: Notify,
    factory: Arc<dyn SessionFactory<S>>,
    max_sessions: usize,
    idle_timeout: Duration,
    acquire_timeout: Duration,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: SessionTransport> Pool<S> {
    pub fn new(
        factory: Arc<dyn SessionFactory<S>>,
        max_sessions: usize,
        idle_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner {
                available: VecDeque::new(),
                in_use: std::collections::HashSet::new(),
                by_id: std::collections::HashMap::new(),
                closed: false,
                total_created: 0,
                total_acquisitions: 0,
                wait_count: 0,
                next_id: 1,
                creating: 0,
            }),
            notify: Notify::new(),
            factory,
            max_sessions,
            idle_timeout,
            acquire_timeout,
            reaper: std::sync::Mutex::new(None),
        });
        pool
    }

    /// Spawns the optional idle reaper, off by default (tests should
    /// leave it unspawned for determinism).
    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = (pool.idle_timeout / 2).max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.reap_idle().await;
            }
        });
        *self.reaper.lock().unwrap() = Some(handle);
    }

    async fn reap_idle(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let mut keep = VecDeque::new();
        while let Some(entry) = inner.available.pop_front() {
            let last_used = *entry.last_used.lock().unwrap();
            if now.duration_since(last_used) > idle_timeout {
                inner.by_id.remove(&entry.id);
                let session = Arc::clone(&entry.session);
                tokio::spawn(async move { session.close().await });
                debug!(id = entry.id, "reaped idle session");
            } else {
                keep.push_back(entry);
            }
        }
        inner.available = keep;
    }

    /// Acquires a handle: reuses an available session, creates a new one
    /// if capacity remains, or blocks until one of (release, close,
    /// acquire-timeout, cancellation) occurs.
    pub async fn acquire(&self) -> Result<PoolHandle<S>, ClientError> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            enum Step<S> {
                Got(PoolHandle<S>),
                MustCreate,
                MustWait,
            }

            let step = {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(ClientError::PoolClosed);
                }
                if let Some(entry) = inner.available.pop_front() {
                    entry.touch();
                    inner.in_use.insert(entry.id);
                    inner.total_acquisitions += 1;
                    Step::Got(PoolHandle { entry })
                } else if inner.in_use.len() + inner.creating < self.max_sessions {
                    inner.creating += 1;
                    Step::MustCreate
                } else {
                    inner.wait_count += 1;
                    Step::MustWait
                }
            };

            match step {
                Step::Got(handle) => return Ok(handle),
                Step::MustCreate => match self.create_and_register().await {
                    Ok(handle) => return Ok(handle),
                    Err(e) => {
                        let mut inner = self.inner.lock().await;
                        inner.creating -= 1;
                        drop(inner);
                        self.notify.notify_waiters();
                        return Err(e);
                    }
                },
                Step::MustWait => {
                    let remaining = deadline.checked_sub(Instant::now()).unwrap_or_default();
                    if remaining.is_zero() {
                        return Err(ClientError::PoolExhausted(self.acquire_timeout));
                    }
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(remaining) => {
                            return Err(ClientError::PoolExhausted(self.acquire_timeout));
                        }
                    }
                }
            }
        }
    }

    /// Like [`Pool::acquire`] but also unblocks if `cancel` resolves,
    /// returning a cancellation error without discarding any handle
    /// (none was ever handed out in that case).
    pub async fn acquire_cancellable(
        &self,
        cancel: impl std::future::Future<Output = ()>,
    ) -> Result<PoolHandle<S>, ClientError> {
        tokio::select! {
            res = self.acquire() => res,
            _ = cancel => Err(ClientError::Cancelled("acquire cancelled".into())),
        }
    }

    async fn create_and_register(&self) -> Result<PoolHandle<S>, ClientError> {
        let session = self.factory.create().await?;
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let entry = Arc::new(Entry {
            session: Arc::new(session),
            admin_mode: AtomicBool::new(false),
            use_count: AtomicU64::new(1),
            last_used: std::sync::Mutex::new(Instant::now()),
            id,
        });
        inner.in_use.insert(id);
        inner.by_id.insert(id, Arc::clone(&entry));
        inner.total_created += 1;
        inner.total_acquisitions += 1;
        inner.creating -= 1;
        info!(id, "created new pooled session");
        Ok(PoolHandle { entry })
    }

    /// Returns a handle to the pool. Unknown or already-released handles
    /// are a silent no-op.
    pub async fn release(&self, handle: PoolHandle<S>) {
        let mut inner = self.inner.lock().await;
        if !inner.in_use.remove(&handle.entry.id) {
            return;
        }
        if inner.closed {
            drop(inner);
            handle.entry.session.close().await;
            return;
        }
        inner.available.push_back(handle.entry);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Like [`Pool::release`] but always closes the session and never
    /// returns it to the pool. Used when a command may have corrupted
    /// session state.
    pub async fn discard(&self, handle: PoolHandle<S>) {
        let mut inner = self.inner.lock().await;
        let was_in_use = inner.in_use.remove(&handle.entry.id);
        inner.by_id.remove(&handle.entry.id);
        drop(inner);
        if was_in_use {
            handle.entry.session.close().await;
        }
        self.notify.notify_waiters();
    }

    /// Closes the pool: no new handles are created; available sessions
    /// close now; in-use handles close when their holder releases them.
    /// Wakes every waiting `acquire`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        let to_close: Vec<_> = inner.available.drain(..).collect();
        drop(inner);
        for entry in to_close {
            entry.session.close().await;
        }
        self.notify.notify_waiters();
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            total_created: inner.total_created,
            total_acquisitions: inner.total_acquisitions,
            wait_count: inner.wait_count,
            available: inner.available.len(),
            in_use: inner.in_use.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeSession {
        closed: AtomicBool,
    }

    #[async_trait]
    impl SessionTransport for FakeSession {
        async fn send(&self, _cmd: &str, _deadline: Duration) -> Result<SendOutcome, ClientError> {
            Ok(SendOutcome { bytes: Vec::new(), prompt_kind: PromptKind::Unprivileged })
        }
        async fn read_until_prompt(&self, _deadline: Duration) -> Result<(), ClientError> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct FakeFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory<FakeSession> for FakeFactory {
        async fn create(&self) -> Result<FakeSession, ClientError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession { closed: AtomicBool::new(false) })
        }
    }

    fn make_pool(max: usize) -> Arc<Pool<FakeSession>> {
        let factory = Arc::new(FakeFactory { created: AtomicUsize::new(0) });
        Pool::new(factory, max, Duration::from_secs(300), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn pool_bound_never_exceeded() {
        let pool = make_pool(2);
        let h1 = pool.acquire().await.unwrap();
        let h2 = pool.acquire().await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.in_use, 2);
        assert!(stats.in_use + stats.available <= 2);
        pool.release(h1).await;
        pool.release(h2).await;
    }

    #[tokio::test]
    async fn fifo_release_order_honored() {
        let pool = make_pool(1);
        let h1 = pool.acquire().await.unwrap();
        let id1 = h1.id();
        pool.release(h1).await;
        let h2 = pool.acquire().await.unwrap();
        assert_eq!(h2.id(), id1, "sole released handle must be reused");
        pool.release(h2).await;
    }

    #[tokio::test]
    async fn double_release_is_noop() {
        let pool = make_pool(1);
        let h1 = pool.acquire().await.unwrap();
        let dup = h1.clone();
        pool.release(h1).await;
        pool.release(dup).await;
        let stats = pool.stats().await;
        assert_eq!(stats.available, 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = make_pool(1);
        let _h1 = pool.acquire().await.unwrap();
        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, ClientError::PoolExhausted(_)));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiting_acquire() {
        let pool = make_pool(1);
        let _h1 = pool.acquire().await.unwrap();
        let start = Instant::now();
        let err = pool
            .acquire_cancellable(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, ClientError::Cancelled(_)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn close_wakes_all_waiters_with_pool_closed() {
        let pool = make_pool(1);
        let _h1 = pool.acquire().await.unwrap();
        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close().await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ClientError::PoolClosed)));
    }

    #[tokio::test]
    async fn concurrent_first_acquires_never_overcreate() {
        // All callers race the `MustCreate` branch at once, with no
        // available entries to reuse — the case the `creating` counter
        // guards against a capacity check made, then lost, to another
        // concurrent acquire before the factory call returns.
        let pool = make_pool(3);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move { pool.acquire().await }));
        }
        let mut handles = Vec::new();
        for t in tasks {
            if let Ok(h) = t.await.unwrap() {
                handles.push(h);
            }
        }
        let stats = pool.stats().await;
        assert!(stats.total_created <= 3, "over-created: {}", stats.total_created);
        for h in handles {
            pool.release(h).await;
        }
    }

    #[tokio::test]
    async fn admin_mode_persists_across_release_and_reacquire() {
        let pool = make_pool(1);
        let h1 = pool.acquire().await.unwrap();
        h1.set_admin_mode(true);
        pool.release(h1).await;
        let h2 = pool.acquire().await.unwrap();
        assert!(h2.is_admin_mode());
        pool.release(h2).await;
    }
}
