//! TTL-bounded cache around the remote feed.
//!
//! The freshness check and the refresh run under one lock: while a refresh is
//! in flight every other caller waits for it and then reads its result, error
//! included. A failed refresh returns the error and keeps the last good
//! payload.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use crate::{domain::CacheStatus, ports::FeedSource, Error, Result};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Last successfully fetched feed; replaced wholesale, never edited.
#[derive(Clone, Debug)]
pub struct CachedFeed {
    pub payload: Arc<[u8]>,
    pub fetched_at: Instant,
}

#[derive(Default)]
struct FeedSlot {
    entry: Option<CachedFeed>,
    last_failure: Option<(u64, Error)>,
}

pub struct FeedCache {
    source: Arc<dyn FeedSource>,
    ttl: Duration,
    fetches: AtomicU64,
    slot: Mutex<FeedSlot>,
}

impl FeedCache {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    pub fn with_ttl(source: Arc<dyn FeedSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            fetches: AtomicU64::new(0),
            slot: Mutex::new(FeedSlot::default()),
        }
    }

    pub async fn get_feed(&self) -> Result<Arc<[u8]>> {
        let seen = self.fetches.load(Ordering::SeqCst);
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                tracing::debug!("serving cached feed");
                return Ok(cached.payload.clone());
            }
        }

        if let Some((fetch, err)) = slot.last_failure.as_ref() {
            if *fetch > seen {
                return Err(err.clone());
            }
        }

        let stale = slot.entry.is_some();
        let outcome = self.source.fetch_feed().await;
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        match outcome {
            Ok(bytes) => {
                let payload: Arc<[u8]> = Arc::from(bytes);
                slot.entry = Some(CachedFeed {
                    payload: payload.clone(),
                    fetched_at: Instant::now(),
                });
                slot.last_failure = None;
                tracing::info!(bytes = payload.len(), "feed refreshed");
                Ok(payload)
            }
            Err(e) => {
                tracing::warn!(stale, fetch, error = %e, "feed refresh failed");
                slot.last_failure = Some((fetch, e.clone()));
                Err(e)
            }
        }
    }

    /// Last good feed, fresh or not, without triggering a refresh.
    pub async fn snapshot(&self) -> Option<CachedFeed> {
        self.slot.lock().await.entry.clone()
    }

    pub async fn status(&self) -> CacheStatus {
        match self.slot.lock().await.entry.as_ref() {
            None => CacheStatus::NeverPopulated,
            Some(c) if c.fetched_at.elapsed() >= self.ttl => CacheStatus::StaleButUsable,
            Some(_) => CacheStatus::Fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        failures: std::sync::Mutex<VecDeque<Error>>,
        delay: Duration,
    }

    impl FakeSource {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail_next(&self, e: Error) {
            self.failures.lock().unwrap().push_back(e);
        }
    }

    #[async_trait::async_trait]
    impl FeedSource for FakeSource {
        async fn fetch_feed(&self) -> Result<Vec<u8>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(format!("{{\"feed\":{n}}}").into_bytes())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_hits_cache() {
        let source = Arc::new(FakeSource::default());
        let cache = FeedCache::with_ttl(source.clone(), Duration::from_secs(300));

        let a = cache.get_feed().await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        let b = cache.get_feed().await.unwrap();

        assert_eq!(&*a, b"{\"feed\":1}");
        assert_eq!(a, b);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_exactly_one_fetch() {
        let source = Arc::new(FakeSource::default());
        let cache = FeedCache::with_ttl(source.clone(), Duration::from_secs(300));

        cache.get_feed().await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.status().await, CacheStatus::StaleButUsable);

        let fresh = cache.get_feed().await.unwrap();
        assert_eq!(&*fresh, b"{\"feed\":2}");
        cache.get_feed().await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.status().await, CacheStatus::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_payload() {
        let source = Arc::new(FakeSource::default());
        let cache = FeedCache::with_ttl(source.clone(), Duration::from_secs(300));

        cache.get_feed().await.unwrap();
        tokio::time::advance(Duration::from_secs(400)).await;
        source.fail_next(Error::Transport("feed service unavailable".to_string()));

        let err = cache.get_feed().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let kept = cache.snapshot().await.unwrap();
        assert_eq!(&*kept.payload, b"{\"feed\":1}");
        assert_eq!(cache.status().await, CacheStatus::StaleButUsable);
    }

    #[tokio::test]
    async fn failure_before_first_fetch_leaves_cache_empty() {
        let source = Arc::new(FakeSource::default());
        source.fail_next(Error::Auth("login unauthorized".to_string()));
        let cache = FeedCache::new(source.clone());

        assert!(cache.get_feed().await.is_err());
        assert!(cache.snapshot().await.is_none());
        assert_eq!(cache.status().await, CacheStatus::NeverPopulated);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let source = Arc::new(FakeSource {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = Arc::new(FeedCache::new(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_feed().await }));
        }
        for h in handles {
            assert_eq!(&*h.await.unwrap().unwrap(), b"{\"feed\":1}");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_refresh() {
        let source = Arc::new(FakeSource {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        source.fail_next(Error::Transport("feed service unavailable".to_string()));
        let cache = Arc::new(FeedCache::new(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_feed().await }));
        }
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(Error::Transport(_))));
        }
        assert_eq!(source.calls(), 1);

        let recovered = cache.get_feed().await.unwrap();
        assert_eq!(&*recovered, b"{\"feed\":2}");
        assert_eq!(source.calls(), 2);
    }
}
