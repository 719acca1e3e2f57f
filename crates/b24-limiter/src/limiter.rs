//! Per-tenant leaky-bucket admission control
//!
//! Each portal gets its own bucket, FIFO queue and processor task, created
//! lazily on first use. Admissions for one portal are released strictly
//! one at a time in enqueue order; portals never wait on each other.
//!
//! The bucket counter increments when an admission is released, not when the
//! request completes, and leaks at a fixed rate. Server-observed breaches
//! (`QUERY_LIMIT_EXCEEDED`, HTTP 503) impose a hard block and prefill the
//! bucket to 90% so traffic resumes gently after the block lifts.
//!
//! Idle tenant state is dropped after half an hour without activity, either
//! by an explicit [`RateLimiter::sweep`] or probabilistically after a
//! release.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::classify::limit_exceeded;
use crate::error::{Error, Result};

/// Leaky-bucket tunables.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Admission ceiling; a full bucket pauses the queue until it leaks
    pub max_bucket: f64,
    /// Units drained from the counter per second
    pub leak_rate: f64,
    /// Minimum spacing between two released admissions for one tenant
    pub min_request_interval: Duration,
    /// Duration of the hard block after a server-observed breach
    pub max_block_time: Duration,
    /// Per-tenant queue cap; `None` means unbounded
    pub max_queue_len: Option<usize>,
    /// Idle time after which a tenant's state is swept
    pub idle_ttl: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_bucket: 50.0,
            leak_rate: 2.0,
            min_request_interval: Duration::from_millis(150),
            max_block_time: Duration::from_millis(5000),
            max_queue_len: None,
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl LimiterSettings {
    #[must_use]
    pub fn with_max_bucket(mut self, max_bucket: f64) -> Self {
        self.max_bucket = max_bucket;
        self
    }

    #[must_use]
    pub fn with_leak_rate(mut self, per_second: f64) -> Self {
        self.leak_rate = per_second;
        self
    }

    #[must_use]
    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_block_time(mut self, block: Duration) -> Self {
        self.max_block_time = block;
        self
    }

    #[must_use]
    pub fn with_max_queue_len(mut self, cap: usize) -> Self {
        self.max_queue_len = Some(cap);
        self
    }

    /// Sleep applied while the bucket sits at its ceiling.
    fn full_bucket_pause(&self) -> Duration {
        Duration::from_millis((1000.0 / self.leak_rate).ceil() as u64)
    }
}

/// Mutable per-tenant bucket state. Guarded by a tokio Mutex shared between
/// `admit`/`observe` callers and the tenant's processor task.
struct TenantState {
    counter: f64,
    last_update: Instant,
    block_until: Option<Instant>,
    last_request: Option<Instant>,
    queue_len: usize,
    total_requests: u64,
    last_activity: Instant,
}

impl TenantState {
    fn new(now: Instant) -> Self {
        Self {
            counter: 0.0,
            last_update: now,
            block_until: None,
            last_request: None,
            queue_len: 0,
            total_requests: 0,
            last_activity: now,
        }
    }

    /// Drain the counter for the time elapsed since the last decision and
    /// clear an expired hard block.
    fn leak(&mut self, now: Instant, leak_rate: f64) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.counter = (self.counter - elapsed * leak_rate).max(0.0);
        self.last_update = now;
        if let Some(until) = self.block_until {
            if now > until {
                self.block_until = None;
            }
        }
    }
}

/// One queued admission: the processor fires `grant` when the caller may
/// proceed.
struct Waiting {
    method: String,
    grant: oneshot::Sender<()>,
}

struct TenantSlot {
    queue_tx: mpsc::UnboundedSender<Waiting>,
    state: Arc<Mutex<TenantState>>,
}

struct Inner {
    settings: LimiterSettings,
    tenants: Mutex<HashMap<String, TenantSlot>>,
}

/// Snapshot of one tenant's limiter state, for introspection and tests.
#[derive(Debug, Clone)]
pub struct TenantStats {
    pub domain: String,
    pub counter: f64,
    pub queued: usize,
    pub blocked: bool,
    pub total_requests: u64,
}

/// Per-tenant leaky-bucket rate limiter.
///
/// Cheap to clone; clones share the same tenant map.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                tenants: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wait until the tenant may issue one request.
    ///
    /// Admissions for one domain resolve strictly in call order; admissions
    /// for distinct domains proceed independently. Fails fast with
    /// [`Error::QueueOverflow`] when the per-tenant queue cap is reached.
    pub async fn admit(&self, domain: &str, method: &str) -> Result<()> {
        let grant_rx = {
            let mut tenants = self.inner.tenants.lock().await;
            let slot = self.slot_for(&mut tenants, domain);

            let mut state = slot.state.lock().await;
            if let Some(cap) = self.inner.settings.max_queue_len {
                if state.queue_len >= cap {
                    warn!(domain, method, queued = state.queue_len, "admission queue full");
                    return Err(Error::QueueOverflow {
                        domain: domain.to_string(),
                        queued: state.queue_len,
                    });
                }
            }
            state.queue_len += 1;
            state.last_activity = Instant::now();
            drop(state);

            let (grant_tx, grant_rx) = oneshot::channel();
            slot.queue_tx
                .send(Waiting {
                    method: method.to_string(),
                    grant: grant_tx,
                })
                .map_err(|_| Error::Closed(domain.to_string()))?;
            grant_rx
        };

        trace!(domain, method, "queued for admission");
        grant_rx
            .await
            .map_err(|_| Error::Closed(domain.to_string()))
    }

    /// Report a server response so breaches impose a hard block.
    ///
    /// On a breach the tenant is blocked for the configured time and the
    /// bucket is prefilled to 90%, throttling the tail once the block lifts.
    pub async fn observe(&self, domain: &str, status: u16, body: &Value) {
        if !limit_exceeded(status, body) {
            return;
        }
        let settings = &self.inner.settings;
        let mut tenants = self.inner.tenants.lock().await;
        let slot = self.slot_for(&mut tenants, domain);

        let mut state = slot.state.lock().await;
        let now = Instant::now();
        state.leak(now, settings.leak_rate);
        state.counter = settings.max_bucket * 0.9;
        state.block_until = Some(now + settings.max_block_time);
        state.last_activity = now;
        warn!(
            domain,
            status,
            block_ms = settings.max_block_time.as_millis() as u64,
            "server reported limit breach, blocking tenant"
        );
    }

    /// Drop tenant entries that are idle with an empty queue.
    pub async fn sweep(&self) {
        self.inner.sweep().await;
    }

    /// Snapshot of every known tenant's state.
    pub async fn stats(&self) -> Vec<TenantStats> {
        let tenants = self.inner.tenants.lock().await;
        let mut out = Vec::with_capacity(tenants.len());
        for (domain, slot) in tenants.iter() {
            let state = slot.state.lock().await;
            out.push(TenantStats {
                domain: domain.clone(),
                counter: state.counter,
                queued: state.queue_len,
                blocked: state
                    .block_until
                    .is_some_and(|until| Instant::now() <= until),
                total_requests: state.total_requests,
            });
        }
        out
    }

    /// Get or create the slot for a domain, spawning its processor task.
    fn slot_for<'a>(
        &self,
        tenants: &'a mut HashMap<String, TenantSlot>,
        domain: &str,
    ) -> &'a TenantSlot {
        tenants.entry(domain.to_string()).or_insert_with(|| {
            let (queue_tx, queue_rx) = mpsc::unbounded_channel();
            let state = Arc::new(Mutex::new(TenantState::new(Instant::now())));
            debug!(domain, "creating tenant limiter state");
            tokio::spawn(run_tenant_queue(
                domain.to_string(),
                queue_rx,
                state.clone(),
                self.inner.settings.clone(),
                Arc::downgrade(&self.inner),
            ));
            TenantSlot { queue_tx, state }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimiterSettings::default())
    }
}

impl Inner {
    async fn sweep(&self) {
        let mut tenants = self.tenants.lock().await;
        let now = Instant::now();
        let mut idle = Vec::new();
        for (domain, slot) in tenants.iter() {
            let state = slot.state.lock().await;
            if state.queue_len == 0 && now.duration_since(state.last_activity) > self.settings.idle_ttl
            {
                idle.push(domain.clone());
            }
        }
        for domain in idle {
            // Dropping the slot closes the queue; the processor task exits
            // on the closed channel.
            tenants.remove(&domain);
            debug!(domain, "swept idle tenant limiter state");
        }
    }
}

/// Processor task: releases one queued admission at a time for one tenant.
///
/// Before each release the counter is decayed, then the task waits out (in
/// order) a hard block, the minimum request interval, and a full bucket.
/// The grant is fire-and-forget: the counter increments on release, and the
/// next queued admission is processed immediately after the spacing checks.
async fn run_tenant_queue(
    domain: String,
    mut queue_rx: mpsc::UnboundedReceiver<Waiting>,
    state: Arc<Mutex<TenantState>>,
    settings: LimiterSettings,
    inner: Weak<Inner>,
) {
    while let Some(task) = queue_rx.recv().await {
        loop {
            let pause = {
                let mut state = state.lock().await;
                let now = Instant::now();
                state.leak(now, settings.leak_rate);

                if let Some(until) = state.block_until {
                    Some(until.saturating_duration_since(now))
                } else if let Some(last) = state.last_request {
                    let since = now.duration_since(last);
                    if since < settings.min_request_interval {
                        Some(settings.min_request_interval - since)
                    } else if state.counter >= settings.max_bucket {
                        Some(settings.full_bucket_pause())
                    } else {
                        None
                    }
                } else if state.counter >= settings.max_bucket {
                    Some(settings.full_bucket_pause())
                } else {
                    None
                }
            };

            match pause {
                Some(duration) => tokio::time::sleep(duration).await,
                None => break,
            }
        }

        {
            let mut state = state.lock().await;
            let now = Instant::now();
            state.counter += 1.0;
            state.last_request = Some(now);
            state.last_activity = now;
            state.queue_len = state.queue_len.saturating_sub(1);
            state.total_requests += 1;
        }

        trace!(domain, method = %task.method, "admission released");
        // The caller may have gone away; the slot is consumed either way.
        let _ = task.grant.send(());

        if rand::rng().random_ratio(1, 64) {
            if let Some(inner) = inner.upgrade() {
                inner.sweep().await;
            }
        }
    }
    debug!(domain, "tenant queue closed, processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Settings with short intervals so tests run in real time.
    fn fast_settings() -> LimiterSettings {
        LimiterSettings::default()
            .with_min_request_interval(Duration::from_millis(20))
            .with_max_block_time(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn first_admission_is_immediate() {
        let limiter = RateLimiter::new(fast_settings());
        let started = Instant::now();
        limiter.admit("a.bx", "user.current").await.unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(15),
            "first admission should not wait out the interval, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn same_tenant_admissions_are_fifo_and_spaced() {
        let limiter = RateLimiter::new(fast_settings());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for name in ["A", "B", "C", "D"] {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit("a.bx", name).await.unwrap();
                order.lock().await.push((name, Instant::now()));
            }));
            // Enqueue in a known order
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for h in handles {
            h.await.unwrap();
        }

        let order = order.lock().await;
        let names: Vec<&str> = order.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);

        for pair in order.windows(2) {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(
                gap >= Duration::from_millis(18),
                "consecutive releases {:?} closer than the minimum interval",
                gap
            );
        }
    }

    #[tokio::test]
    async fn distinct_tenants_admit_in_parallel() {
        let limiter = RateLimiter::new(fast_settings());
        // Saturate tenant a's spacing with a first admission
        limiter.admit("a.bx", "m").await.unwrap();

        let started = Instant::now();
        let (a, b) = tokio::join!(limiter.admit("a.bx", "m"), limiter.admit("b.bx", "m"));
        a.unwrap();
        b.unwrap();
        // b.bx must not have waited behind a.bx's interval; the join returns
        // once both resolve, so total time shows only a.bx's spacing.
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "cross-tenant admission appears serialized, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn queue_overflow_fails_fast() {
        let settings = LimiterSettings::default()
            .with_min_request_interval(Duration::from_millis(500))
            .with_max_queue_len(2);
        let limiter = RateLimiter::new(settings);

        // First admission releases immediately; the next two fill the queue
        // while the processor waits out the interval.
        limiter.admit("a.bx", "m").await.unwrap();
        let l1 = limiter.clone();
        let h1 = tokio::spawn(async move { l1.admit("a.bx", "m").await });
        let l2 = limiter.clone();
        let h2 = tokio::spawn(async move { l2.admit("a.bx", "m").await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let overflow = limiter.admit("a.bx", "m").await;
        assert!(matches!(
            overflow,
            Err(Error::QueueOverflow { queued: 2, .. })
        ));

        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn observe_breach_blocks_and_prefills() {
        let limiter = RateLimiter::new(fast_settings());
        limiter.admit("a.bx", "m").await.unwrap();

        limiter
            .observe("a.bx", 400, &json!({"error": "QUERY_LIMIT_EXCEEDED"}))
            .await;

        let stats = limiter.stats().await;
        let tenant = stats.iter().find(|s| s.domain == "a.bx").unwrap();
        assert!(tenant.blocked);
        assert!(
            tenant.counter >= 45.0 - f64::EPSILON,
            "counter should be prefilled to 90%, got {}",
            tenant.counter
        );

        // An admission during the block must wait out the block window.
        let started = Instant::now();
        limiter.admit("a.bx", "m").await.unwrap();
        assert!(
            started.elapsed() >= Duration::from_millis(190),
            "admission released {:?} into a 200ms block",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn observe_503_blocks_even_without_domain_error() {
        let limiter = RateLimiter::new(fast_settings());
        limiter.observe("a.bx", 503, &json!({})).await;

        let stats = limiter.stats().await;
        assert!(stats.iter().any(|s| s.domain == "a.bx" && s.blocked));
    }

    #[tokio::test]
    async fn observe_ordinary_response_is_a_no_op() {
        let limiter = RateLimiter::new(fast_settings());
        limiter
            .observe("a.bx", 200, &json!({"result": {"ID": "1"}}))
            .await;
        assert!(limiter.stats().await.is_empty());
    }

    #[tokio::test]
    async fn full_bucket_defers_admission() {
        let settings = LimiterSettings::default()
            .with_max_bucket(2.0)
            .with_leak_rate(10.0)
            .with_min_request_interval(Duration::from_millis(1));
        let limiter = RateLimiter::new(settings);

        // Three back-to-back admissions push the counter past the ceiling
        // (the last release may cross it); the fourth must wait out the
        // full-bucket pause while the counter leaks back under.
        for _ in 0..3 {
            limiter.admit("a.bx", "m").await.unwrap();
        }

        let started = Instant::now();
        limiter.admit("a.bx", "m").await.unwrap();
        assert!(
            started.elapsed() >= Duration::from_millis(50),
            "admission over a full bucket should wait for leakage, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn counter_leaks_over_time() {
        let settings = LimiterSettings::default()
            .with_leak_rate(50.0)
            .with_min_request_interval(Duration::from_millis(1));
        let limiter = RateLimiter::new(settings);

        for _ in 0..5 {
            limiter.admit("a.bx", "m").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Force a decay by admitting once more
        limiter.admit("a.bx", "m").await.unwrap();

        let stats = limiter.stats().await;
        let tenant = stats.iter().find(|s| s.domain == "a.bx").unwrap();
        assert!(
            tenant.counter <= 2.0,
            "counter should have leaked, got {}",
            tenant.counter
        );
    }

    #[tokio::test]
    async fn sweep_drops_idle_tenants_only() {
        let settings = LimiterSettings {
            idle_ttl: Duration::from_millis(30),
            ..fast_settings()
        };
        let limiter = RateLimiter::new(settings);

        limiter.admit("idle.bx", "m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.admit("busy.bx", "m").await.unwrap();

        limiter.sweep().await;

        let domains: Vec<String> = limiter.stats().await.into_iter().map(|s| s.domain).collect();
        assert!(!domains.contains(&"idle.bx".to_string()));
        assert!(domains.contains(&"busy.bx".to_string()));
    }

    #[tokio::test]
    async fn tenant_state_recreated_after_sweep() {
        let settings = LimiterSettings {
            idle_ttl: Duration::from_millis(10),
            ..fast_settings()
        };
        let limiter = RateLimiter::new(settings);

        limiter.admit("a.bx", "m").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.sweep().await;
        assert!(limiter.stats().await.is_empty());

        // A fresh admission transparently recreates the tenant.
        limiter.admit("a.bx", "m").await.unwrap();
        assert_eq!(limiter.stats().await.len(), 1);
    }

    #[tokio::test]
    async fn stats_count_total_requests() {
        let limiter = RateLimiter::new(fast_settings());
        for _ in 0..3 {
            limiter.admit("a.bx", "m").await.unwrap();
        }
        let stats = limiter.stats().await;
        let tenant = stats.iter().find(|s| s.domain == "a.bx").unwrap();
        assert_eq!(tenant.total_requests, 3);
        assert_eq!(tenant.queued, 0);
    }
}
