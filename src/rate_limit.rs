use crate::render::PosterError;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct UpstreamLimit {
    // zero disables gating
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LimiterStats {
    pub granted: u64,
    pub waited: u64,
    pub rejected: u64,
    pub waiting_now: usize,
}

// a spent token returns exactly one window after it was spent
#[derive(Clone)]
pub struct UpstreamLimiter {
    limits: Arc<DashMap<String, UpstreamLimit>>,
    buckets: Arc<DashMap<String, Bucket>>,
    max_wait: Duration,
    max_waiters: usize,
    waiting: Arc<AtomicUsize>,
    granted: Arc<AtomicU64>,
    waited: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
struct Bucket {
    spent: VecDeque<Instant>,
}

impl Bucket {
    fn try_take(&mut self, now: Instant, limit: &UpstreamLimit) -> Result<(), Instant> {
        while let Some(&oldest) = self.spent.front() {
            if now.duration_since(oldest) >= limit.window {
                self.spent.pop_front();
            } else {
                break;
            }
        }
        if self.spent.len() < limit.limit as usize {
            self.spent.push_back(now);
            return Ok(());
        }
        match self.spent.front() {
            Some(&oldest) => Err(oldest + limit.window),
            None => Ok(()),
        }
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl UpstreamLimiter {
    pub fn new(max_wait: Duration, max_waiters: usize) -> Self {
        Self {
            limits: Arc::new(DashMap::new()),
            buckets: Arc::new(DashMap::new()),
            max_wait,
            max_waiters: max_waiters.max(1),
            waiting: Arc::new(AtomicUsize::new(0)),
            granted: Arc::new(AtomicU64::new(0)),
            waited: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn configure(&self, service: &str, limit: UpstreamLimit) {
        self.limits.insert(service.to_string(), limit);
        self.buckets.remove(service);
    }

    pub async fn acquire(&self, service: &str) -> Result<Duration, PosterError> {
        let Some(limit) = self.limits.get(service).map(|entry| *entry.value()) else {
            return Ok(Duration::ZERO);
        };
        if limit.limit == 0 || limit.window.is_zero() {
            return Ok(Duration::ZERO);
        }
        let started = Instant::now();
        let mut guard = None;
        loop {
            let now = Instant::now();
            let outcome = self
                .buckets
                .entry(service.to_string())
                .or_default()
                .try_take(now, &limit);
            let ready_at = match outcome {
                Ok(()) => {
                    self.granted.fetch_add(1, Ordering::Relaxed);
                    let waited = now.duration_since(started);
                    if !waited.is_zero() {
                        debug!(service, waited_ms = waited.as_millis() as u64, "rate limit token granted after wait");
                    }
                    return Ok(waited);
                }
                Err(ready_at) => ready_at,
            };
            if ready_at.duration_since(started) > self.max_wait {
                return Err(self.reject(service, "wait ceiling exceeded"));
            }
            if guard.is_none() {
                let queued = self.waiting.fetch_add(1, Ordering::Relaxed);
                guard = Some(WaiterGuard(&self.waiting));
                if queued >= self.max_waiters {
                    return Err(self.reject(service, "too many waiters"));
                }
                self.waited.fetch_add(1, Ordering::Relaxed);
            }
            tokio::time::sleep_until(ready_at).await;
        }
    }

    fn reject(&self, service: &str, reason: &'static str) -> PosterError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(service, reason, "rate limit wait rejected");
        PosterError::UpstreamRateLimited {
            service: service.to_string(),
        }
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            granted: self.granted.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            waiting_now: self.waiting.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn limiter(limit: u32, window_secs: u64, max_wait_secs: u64) -> UpstreamLimiter {
        let limiter = UpstreamLimiter::new(Duration::from_secs(max_wait_secs), 64);
        limiter.configure(
            "tmdb",
            UpstreamLimit {
                limit,
                window: Duration::from_secs(window_secs),
            },
        );
        limiter
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_window_never_exceeds_limit() {
        let limiter = limiter(4, 10, 120);
        let grants = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let grants = grants.clone();
            tasks.push(tokio::spawn(async move {
                limiter.acquire("tmdb").await.unwrap();
                grants.lock().unwrap().push(Instant::now());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let mut grants = grants.lock().unwrap().clone();
        grants.sort();
        assert_eq!(grants.len(), 20);
        for (index, start) in grants.iter().enumerate() {
            let in_window = grants[index..]
                .iter()
                .filter(|t| t.duration_since(*start) < Duration::from_secs(10))
                .count();
            assert!(in_window <= 4, "{in_window} grants inside one window");
        }
        assert_eq!(limiter.stats().granted, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_past_ceiling_is_rate_limited() {
        let limiter = limiter(1, 30, 5);
        limiter.acquire("tmdb").await.unwrap();
        let err = limiter.acquire("tmdb").await.unwrap_err();
        assert_eq!(
            err,
            PosterError::UpstreamRateLimited {
                service: "tmdb".to_string()
            }
        );
        assert_eq!(limiter.stats().rejected, 1);
        assert_eq!(limiter.stats().waiting_now, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_caller_waits_for_refill() {
        let limiter = limiter(2, 10, 60);
        limiter.acquire("tmdb").await.unwrap();
        limiter.acquire("tmdb").await.unwrap();
        let waited = limiter.acquire("tmdb").await.unwrap();
        assert_eq!(waited, Duration::from_secs(10));
        assert_eq!(limiter.stats().waited, 1);
    }

    #[tokio::test]
    async fn unconfigured_and_zero_limits_are_open() {
        let limiter = limiter(0, 10, 1);
        for _ in 0..100 {
            limiter.acquire("tmdb").await.unwrap();
            limiter.acquire("plex").await.unwrap();
        }
        assert_eq!(limiter.stats().granted, 0);
    }
}
