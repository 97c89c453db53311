//! Quota governor shared by every worker.
//!
//! Two independent limits guard the upstream directory API:
//!
//! - a concurrency bound (a tokio `Semaphore`), held for the whole call;
//! - a rolling-window call rate, plus a cool-down entered whenever the
//!   upstream reports quota exhaustion.
//!
//! `acquire()` waits for both and hands back a [`QuotaPermit`]; dropping the
//! permit releases the concurrency slot no matter how the call ended. A permit
//! that ends up unused is handed back with [`QuotaGovernor::refund`], which
//! also returns its rate-window slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Governor configuration.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum concurrent in-flight calls (N)
    pub max_concurrent: usize,
    /// Maximum calls admitted per window (R)
    pub max_per_window: usize,
    /// Rolling window length
    pub window: Duration,
    /// First cool-down after a quota signal; doubles per consecutive signal
    pub cooldown_base: Duration,
    /// Cool-down cap (an upstream Retry-After may exceed it)
    pub cooldown_max: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_per_window: 25,
            window: Duration::from_secs(1),
            cooldown_base: Duration::from_secs(1),
            cooldown_max: Duration::from_secs(60),
        }
    }
}

impl QuotaConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_rate(mut self, calls: usize, window: Duration) -> Self {
        self.max_per_window = calls.max(1);
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, base: Duration, max: Duration) -> Self {
        self.cooldown_base = base;
        self.cooldown_max = max;
        self
    }
}

/// The concurrency semaphore was closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("quota governor is closed")]
pub struct GovernorClosed;

/// Admission to make one upstream call. Released on drop.
#[derive(Debug)]
pub struct QuotaPermit {
    _slot: OwnedSemaphorePermit,
    admitted_at: Instant,
}

/// Point-in-time view of the governor, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub window_calls: usize,
    pub max_per_window: usize,
    pub window_ms: u64,
    pub cooldown_remaining_ms: u64,
    pub quota_streak: u32,
}

#[derive(Debug, Default)]
struct WindowState {
    admitted: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    quota_streak: u32,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.admitted.front() {
            if now.duration_since(*front) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Process-wide limiter for outbound directory calls.
#[derive(Debug)]
pub struct QuotaGovernor {
    config: QuotaConfig,
    slots: Arc<Semaphore>,
    state: Mutex<WindowState>,
}

impl QuotaGovernor {
    pub fn new(config: QuotaConfig) -> Self {
        let config = QuotaConfig {
            max_concurrent: config.max_concurrent.max(1),
            max_per_window: config.max_per_window.max(1),
            ..config
        };
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            state: Mutex::new(WindowState::default()),
            config,
        }
    }

    pub fn arc(config: QuotaConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // The state is plain counters; a panic mid-update cannot corrupt it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a call may be made.
    pub async fn acquire(&self) -> Result<QuotaPermit, GovernorClosed> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GovernorClosed)?;

        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                state.prune(now, self.config.window);

                match state.cooldown_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        state.cooldown_until = None;
                        if state.admitted.len() < self.config.max_per_window {
                            state.admitted.push_back(now);
                            return Ok(QuotaPermit {
                                _slot: slot,
                                admitted_at: now,
                            });
                        }
                        match state.admitted.front() {
                            Some(oldest) => (*oldest + self.config.window).saturating_duration_since(now),
                            None => Duration::ZERO,
                        }
                    }
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "quota governor throttling");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Return a permit that was never used for a call.
    pub fn refund(&self, permit: QuotaPermit) {
        let mut state = self.lock();
        if let Some(pos) = state
            .admitted
            .iter()
            .rposition(|at| *at == permit.admitted_at)
        {
            state.admitted.remove(pos);
        }
    }

    /// Record an explicit quota exhaustion signal from the upstream.
    ///
    /// Blocks new admissions for an exponentially growing cool-down, or for
    /// `retry_after` when the upstream asked for longer.
    pub fn report_quota_exceeded(&self, retry_after: Option<Duration>) {
        let mut state = self.lock();
        state.quota_streak = state.quota_streak.saturating_add(1);

        let exp = 2u32.saturating_pow(state.quota_streak.saturating_sub(1).min(20));
        let backoff = self
            .config
            .cooldown_base
            .saturating_mul(exp)
            .min(self.config.cooldown_max);
        let delay = retry_after.map_or(backoff, |ra| ra.max(backoff));

        let until = Instant::now() + delay;
        state.cooldown_until = Some(match state.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        warn!(
            streak = state.quota_streak,
            cooldown_ms = delay.as_millis() as u64,
            "upstream quota exceeded; cooling down"
        );
    }

    /// A call succeeded: the quota streak is over.
    pub fn report_success(&self) {
        let mut state = self.lock();
        state.quota_streak = 0;
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let mut state = self.lock();
        let now = Instant::now();
        state.prune(now, self.config.window);
        let cooldown_remaining = state
            .cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        QuotaSnapshot {
            in_flight: self.config.max_concurrent - self.slots.available_permits(),
            max_concurrent: self.config.max_concurrent,
            window_calls: state.admitted.len(),
            max_per_window: self.config.max_per_window,
            window_ms: self.config.window.as_millis() as u64,
            cooldown_remaining_ms: cooldown_remaining.as_millis() as u64,
            quota_streak: state.quota_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wide_open(n: usize) -> QuotaConfig {
        QuotaConfig::default()
            .with_max_concurrent(n)
            .with_rate(10_000, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_limit() {
        let governor = QuotaGovernor::arc(wide_open(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let governor = governor.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(governor.snapshot().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rate_is_enforced() {
        let governor = QuotaGovernor::new(
            QuotaConfig::default()
                .with_max_concurrent(10)
                .with_rate(2, Duration::from_secs(1)),
        );
        let start = Instant::now();
        for _ in 0..2 {
            drop(governor.acquire().await.unwrap());
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        drop(governor.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_signal_triggers_cooldown() {
        let governor = QuotaGovernor::new(
            wide_open(4).with_cooldown(Duration::from_millis(200), Duration::from_secs(5)),
        );
        governor.report_quota_exceeded(None);
        governor.report_quota_exceeded(None);
        let snap = governor.snapshot();
        assert_eq!(snap.quota_streak, 2);
        assert_eq!(snap.cooldown_remaining_ms, 400);

        let start = Instant::now();
        drop(governor.acquire().await.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(400));

        governor.report_success();
        assert_eq!(governor.snapshot().quota_streak, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_shorter_backoff() {
        let governor = QuotaGovernor::new(
            wide_open(4).with_cooldown(Duration::from_millis(100), Duration::from_secs(1)),
        );
        governor.report_quota_exceeded(Some(Duration::from_secs(3)));
        assert_eq!(governor.snapshot().cooldown_remaining_ms, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn refunded_permit_frees_window_slot() {
        let governor = QuotaGovernor::new(
            QuotaConfig::default()
                .with_max_concurrent(4)
                .with_rate(1, Duration::from_secs(1)),
        );
        let permit = governor.acquire().await.unwrap();
        assert_eq!(governor.snapshot().window_calls, 1);
        governor.refund(permit);

        let snap = governor.snapshot();
        assert_eq!((snap.window_calls, snap.in_flight), (0, 0));
        let start = Instant::now();
        drop(governor.acquire().await.unwrap());
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn permit_released_on_cancellation() {
        let governor = QuotaGovernor::arc(wide_open(1));
        let held = governor.acquire().await.unwrap();

        let waiter = {
            let governor = governor.clone();
            tokio::spawn(async move { governor.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        waiter.abort();
        let _ = waiter.await;
        drop(held);

        assert_eq!(governor.snapshot().in_flight, 0);
        drop(governor.acquire().await.unwrap());
    }
}
