//! Config Cache (C6): a thread-safe TTL + dirty-flag store for the
//! device's full text configuration, shared across higher-level services
//! that each parse the same snapshot.
//!
//! No direct teacher precedent — the teacher's `moka` cache serves
//! connections, not parsed text — so this is grounded instead in
//! `unet-core`'s general cache-in-front-of-fetch idiom while keeping the
//! simple hand-rolled `Arc<RwLock<...>>` style this corpus favors for
//! small in-process caches.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::DEFAULT_CACHE_TTL;

struct Inner<P> {
    raw: Option<String>,
    parsed: Option<P>,
    valid_until: Option<Instant>,
    dirty: bool,
}

/// TTL + dirty-flag cache over one parsed representation `P` of the raw
/// device config text.
pub struct ConfigCache<P> {
    inner: RwLock<Inner<P>>,
    default_ttl: Duration,
}

impl<P: Clone> ConfigCache<P> {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner { raw: None, parsed: None, valid_until: None, dirty: false }),
            default_ttl,
        }
    }

    /// Returns the parsed value and whether it was present.
    pub async fn get(&self) -> (Option<P>, bool) {
        let inner = self.inner.read().await;
        (inner.parsed.clone(), inner.parsed.is_some())
    }

    pub async fn get_raw(&self) -> Option<String> {
        self.inner.read().await.raw.clone()
    }

    /// Stores `raw`/`parsed`, clears dirty, and refreshes validity using
    /// the default TTL.
    pub async fn set(&self, raw: String, parsed: P) {
        self.set_with_ttl(raw, parsed, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, raw: String, parsed: P, ttl: Duration) {
        let mut inner = self.inner.write().await;
        inner.raw = Some(raw);
        inner.parsed = Some(parsed);
        inner.valid_until = Some(Instant::now() + ttl);
        inner.dirty = false;
    }

    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        inner.raw = None;
        inner.parsed = None;
        inner.valid_until = None;
        inner.dirty = false;
    }

    pub async fn mark_dirty(&self) {
        self.inner.write().await.dirty = true;
    }

    pub async fn clear_dirty(&self) {
        self.inner.write().await.dirty = false;
    }

    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.dirty
    }

    /// `IsValid() <=> parsed present AND now < valid-until`. Orthogonal
    /// to `is_dirty` — callers combine both to decide whether to refetch.
    pub async fn is_valid(&self) -> bool {
        let inner = self.inner.read().await;
        match (&inner.parsed, inner.valid_until) {
            (Some(_), Some(valid_until)) => Instant::now() < valid_until,
            _ => false,
        }
    }
}

impl<P: Clone> Default for ConfigCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value_and_is_valid() {
        let cache: ConfigCache<String> = ConfigCache::new();
        cache.set("raw text".into(), "parsed".into()).await;
        let (value, present) = cache.get().await;
        assert!(present);
        assert_eq!(value.unwrap(), "parsed");
        assert!(cache.is_valid().await);
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cache: ConfigCache<String> = ConfigCache::with_default_ttl(Duration::from_millis(20));
        cache.set("raw".into(), "parsed".into()).await;
        assert!(cache.is_valid().await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.is_valid().await);
    }

    #[tokio::test]
    async fn mark_dirty_is_orthogonal_to_validity() {
        let cache: ConfigCache<String> = ConfigCache::new();
        cache.set("raw".into(), "parsed".into()).await;
        cache.mark_dirty().await;
        assert!(cache.is_dirty().await);
        assert!(cache.is_valid().await);
    }

    #[tokio::test]
    async fn set_clears_dirty_flag() {
        let cache: ConfigCache<String> = ConfigCache::new();
        cache.mark_dirty().await;
        cache.set("raw".into(), "parsed".into()).await;
        assert!(!cache.is_dirty().await);
    }

    #[tokio::test]
    async fn empty_cache_is_not_valid() {
        let cache: ConfigCache<String> = ConfigCache::new();
        assert!(!cache.is_valid().await);
        let (value, present) = cache.get().await;
        assert!(value.is_none());
        assert!(!present);
    }
}
